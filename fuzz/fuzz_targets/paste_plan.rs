#![no_main]

use libfuzzer_sys::fuzz_target;
use md_collab::model::Node;
use md_collab::{CodecConfig, MarkdownCodec, Position, Registry, Selection, paste};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let codec = MarkdownCodec::new(Arc::new(Registry::foundation()), CodecConfig::default());
    let root = Node::doc(vec![Node::paragraph(Vec::new())]);
    let caret = Selection::caret(Position::new(vec![0], 0));
    if let Ok(Some(plan)) = paste::plan(&codec, &input) {
        let _ = paste::ops_for(plan, &root, Some(&caret));
    }
});
