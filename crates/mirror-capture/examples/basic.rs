//! Capture a small page, mutate it, and print what the sink received.
//!
//! Run with `RUST_LOG=mirror_capture=debug` to see the engine's own logs.

use std::rc::Rc;

use mirror_capture::{Capture, CaptureConfig, MemorySink, SystemClock};
use mirror_dom::DomTree;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut dom = DomTree::new();
    let html = dom.create_element("html");
    let body = dom.create_element("body");
    let heading = dom.create_element("h1");
    let title = dom.create_text("Hello");
    dom.append_child(dom.root(), html)?;
    dom.append_child(html, body)?;
    dom.append_child(body, heading)?;
    dom.append_child(heading, title)?;

    let sink = MemorySink::new();
    let mut capture = Capture::new(CaptureConfig::default(), Rc::new(SystemClock::new()), sink.clone());
    capture.start()?;
    capture.run_until_idle(&mut dom);

    dom.set_text(title, "Hello, world")?;
    dom.set_attribute(heading, "class", "greeting")?;
    let sheet = dom.create_style_sheet();
    dom.replace_sync(sheet, "h1 { color: teal }")?;
    dom.set_adopted_style_sheets(dom.root(), vec![sheet])?;
    capture.run_until_idle(&mut dom);
    capture.compute(&mut dom);

    for encoded in sink.take() {
        println!("{:?} @ {:?}", encoded.event, encoded.time);
        for record in &encoded.nodes {
            println!("  {:?} {:?}", record.source, record.value);
        }
        for update in &encoded.sheet_updates {
            println!("  sheet {:?}", update.data);
        }
        for adoption in &encoded.adoptions {
            println!("  adopt {:?} -> {:?}", adoption.document, adoption.new_ids);
        }
    }

    capture.stop(&mut dom);
    Ok(())
}
