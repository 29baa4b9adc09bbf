//! CSSOM - style sheets and the style-sheet prototype
//!
//! Rule mutation through the CSSOM never produces mutation records. The
//! entry points dispatch through [`StyleSheetPrototype`], a tree-wide
//! table of replaceable methods, so an embedder can wrap them.

use std::any::Any;
use std::rc::Rc;

use crate::{DomError, DomTree, NodeId};

/// Style sheet handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(pub(crate) u32);

/// CSS style sheet
#[derive(Debug)]
pub struct StyleSheet {
    /// Owning `<style>` element (NONE for constructed sheets)
    pub owner_node: NodeId,
    /// Created through the constructor (only these allow `replace`)
    pub constructed: bool,
    /// Rule texts in order
    rules: Vec<String>,
    /// Opaque embedder annotation carried by the sheet object
    pub annotation: Option<String>,
}

impl StyleSheet {
    pub(crate) fn owned_by(owner: NodeId, text: &str) -> Self {
        Self {
            owner_node: owner,
            constructed: false,
            rules: split_rules(text),
            annotation: None,
        }
    }

    pub(crate) fn constructed() -> Self {
        Self {
            owner_node: NodeId::NONE,
            constructed: true,
            rules: Vec::new(),
            annotation: None,
        }
    }

    /// Owning node, if any
    pub fn owner(&self) -> Option<NodeId> {
        self.owner_node.option()
    }

    /// Rule list
    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Serialized rules, concatenated
    pub fn css_text(&self) -> String {
        self.rules.concat()
    }

    pub(crate) fn set_text(&mut self, text: &str) {
        self.rules = split_rules(text);
    }

    fn insert(&mut self, rule: &str, index: usize) -> Result<usize, DomError> {
        if index > self.rules.len() {
            return Err(DomError::IndexSize { index, len: self.rules.len() });
        }
        let parsed = split_rules(rule);
        let [single] = parsed.as_slice() else {
            return Err(DomError::NotAllowed("insertRule expects exactly one rule"));
        };
        self.rules.insert(index, single.clone());
        Ok(index)
    }

    fn delete(&mut self, index: usize) -> Result<(), DomError> {
        if index >= self.rules.len() {
            return Err(DomError::IndexSize { index, len: self.rules.len() });
        }
        self.rules.remove(index);
        Ok(())
    }
}

/// Split style text into top-level rules by brace depth
pub fn split_rules(text: &str) -> Vec<String> {
    let mut rules = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let rule = text[start..=i].trim();
                    if !rule.is_empty() {
                        rules.push(rule.to_string());
                    }
                    start = i + 1;
                }
            }
            ';' if depth == 0 => {
                // Statement at-rules such as @import
                let rule = text[start..=i].trim();
                if !rule.is_empty() {
                    rules.push(rule.to_string());
                }
                start = i + 1;
            }
            _ => {}
        }
    }
    // Unterminated trailing rule, closed at end of input
    let tail = text[start..].trim();
    if !tail.is_empty() {
        rules.push(tail.to_string());
    }
    rules
}

pub type InsertRuleFn = dyn Fn(&mut DomTree, SheetId, &str, usize) -> Result<usize, DomError>;
pub type DeleteRuleFn = dyn Fn(&mut DomTree, SheetId, usize) -> Result<(), DomError>;
pub type ReplaceFn = dyn Fn(&mut DomTree, SheetId, &str) -> Result<(), DomError>;

/// One replaceable prototype method
///
/// Keeps the original while wrapped so it can be put back exactly once.
pub struct SheetMethods<F: ?Sized> {
    current: Rc<F>,
    saved: Option<Rc<F>>,
}

impl<F: ?Sized> SheetMethods<F> {
    fn native(f: Rc<F>) -> Self {
        Self { current: f, saved: None }
    }

    /// Implementation calls currently dispatch to
    pub fn get(&self) -> Rc<F> {
        Rc::clone(&self.current)
    }

    pub fn is_wrapped(&self) -> bool {
        self.saved.is_some()
    }

    /// Replace the method with `wrap(original)`. No-op when already wrapped.
    pub fn wrap(&mut self, wrap: impl FnOnce(Rc<F>) -> Rc<F>) -> bool {
        if self.saved.is_some() {
            return false;
        }
        let original = Rc::clone(&self.current);
        self.current = wrap(Rc::clone(&original));
        self.saved = Some(original);
        true
    }

    /// Put the saved original back. No-op when not wrapped.
    pub fn restore(&mut self) -> bool {
        match self.saved.take() {
            Some(original) => {
                self.current = original;
                true
            }
            None => false,
        }
    }
}

/// Tree-wide style-sheet method table
pub struct StyleSheetPrototype {
    pub insert_rule: SheetMethods<InsertRuleFn>,
    pub delete_rule: SheetMethods<DeleteRuleFn>,
    pub replace: SheetMethods<ReplaceFn>,
    pub replace_sync: SheetMethods<ReplaceFn>,
    /// Embedder state kept alongside the wrappers
    attachment: Option<Rc<dyn Any>>,
}

impl StyleSheetPrototype {
    /// Attached state of type `T`, if any
    pub fn attachment<T: Any>(&self) -> Option<Rc<T>> {
        Rc::clone(self.attachment.as_ref()?).downcast::<T>().ok()
    }

    /// Attach embedder state, replacing what was there
    pub fn attach(&mut self, value: Rc<dyn Any>) {
        self.attachment = Some(value);
    }

    pub fn detach(&mut self) -> Option<Rc<dyn Any>> {
        self.attachment.take()
    }
}

impl Default for StyleSheetPrototype {
    fn default() -> Self {
        Self {
            insert_rule: SheetMethods::<InsertRuleFn>::native(Rc::new(native_insert_rule)),
            delete_rule: SheetMethods::<DeleteRuleFn>::native(Rc::new(native_delete_rule)),
            replace: SheetMethods::<ReplaceFn>::native(Rc::new(native_replace)),
            replace_sync: SheetMethods::<ReplaceFn>::native(Rc::new(native_replace)),
            attachment: None,
        }
    }
}

impl std::fmt::Debug for StyleSheetPrototype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StyleSheetPrototype")
            .field("insert_rule_wrapped", &self.insert_rule.is_wrapped())
            .field("delete_rule_wrapped", &self.delete_rule.is_wrapped())
            .field("replace_wrapped", &self.replace.is_wrapped())
            .field("replace_sync_wrapped", &self.replace_sync.is_wrapped())
            .field("attached", &self.attachment.is_some())
            .finish()
    }
}

fn native_insert_rule(dom: &mut DomTree, sheet: SheetId, rule: &str, index: usize) -> Result<usize, DomError> {
    dom.sheet_entry(sheet)?.insert(rule, index)
}

fn native_delete_rule(dom: &mut DomTree, sheet: SheetId, index: usize) -> Result<(), DomError> {
    dom.sheet_entry(sheet)?.delete(index)
}

fn native_replace(dom: &mut DomTree, sheet: SheetId, text: &str) -> Result<(), DomError> {
    let sheet = dom.sheet_entry(sheet)?;
    if !sheet.constructed {
        return Err(DomError::NotAllowed("replace on a non-constructed style sheet"));
    }
    sheet.set_text(text);
    Ok(())
}
