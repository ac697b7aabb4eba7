#![no_main]

use libfuzzer_sys::fuzz_target;
use md_collab::{CodecConfig, MarkdownCodec, Registry};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    let input = String::from_utf8_lossy(data);
    let codec = MarkdownCodec::new(Arc::new(Registry::foundation()), CodecConfig::default());
    if let Ok(doc) = codec.parse(&input) {
        let rendered = codec.render(&doc);
        let reparsed = codec
            .parse(&rendered)
            .expect("rendered markdown must parse");
        assert_eq!(reparsed, doc, "round trip changed the tree");
    }
});
