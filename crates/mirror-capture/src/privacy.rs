//! Privacy classification
//!
//! Decides, per node, whether captured text and input values are redacted
//! before they are written into the mirror.

use mirror_dom::{DomTree, NodeId};
use serde::Serialize;

/// Attribute that masks an element and its subtree
pub const MASK_ATTRIBUTE: &str = "data-mirror-mask";
/// Attribute that lifts masking for an element and its subtree
pub const UNMASK_ATTRIBUTE: &str = "data-mirror-unmask";

const MASK_CHAR: char = '\u{2022}';

/// Privacy level of a mirrored node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Privacy {
    #[default]
    None,
    Mask,
    Unmask,
}

impl Privacy {
    pub fn masks(self) -> bool {
        self == Privacy::Mask
    }
}

/// Privacy policy consulted before attributes and text are captured
pub trait PrivacyClassifier {
    /// Classify `node`; `inherited` is the level of its mirrored parent
    fn classify(&self, dom: &DomTree, node: NodeId, inherited: Privacy) -> Privacy;
}

/// Attribute-driven policy
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPrivacy;

impl PrivacyClassifier for DefaultPrivacy {
    fn classify(&self, dom: &DomTree, node: NodeId, inherited: Privacy) -> Privacy {
        if dom.attribute(node, MASK_ATTRIBUTE).is_some() {
            Privacy::Mask
        } else if dom.attribute(node, UNMASK_ATTRIBUTE).is_some() {
            Privacy::Unmask
        } else {
            inherited
        }
    }
}

/// Replace every non-whitespace character
pub fn mask_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { c } else { MASK_CHAR })
        .collect()
}

/// Attribute value as it goes into the mirror
pub fn mask_attribute(tag: &str, name: &str, value: &str, password: bool, privacy: Privacy) -> String {
    let sensitive = matches!(name, "value" | "placeholder");
    let always = tag == "input" && password && name == "value";
    if always || (sensitive && privacy.masks()) {
        mask_text(value)
    } else {
        value.to_string()
    }
}
