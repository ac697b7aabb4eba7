use md_collab::{CodecConfig, Mark, MarkdownCodec, Node, Registry};
use proptest::collection::vec;
use proptest::prelude::*;
use std::sync::Arc;
mod proptest_config;

fn codec() -> MarkdownCodec {
    MarkdownCodec::new(Arc::new(Registry::foundation()), CodecConfig::default())
}

fn words() -> impl Strategy<Value = String> {
    "[a-z]{1,8}( [a-z]{1,8}){0,3}"
}

/// A run of words, sometimes wrapped in punctuation so emphasis has to fall
/// back to its HTML form.
fn marked_text() -> impl Strategy<Value = String> {
    (
        prop::sample::select(vec!["", "", "(", "\"", "'"]),
        "[a-z]{1,6}( [a-z]{1,6}){0,2}",
        prop::sample::select(vec!["", "", ".", ",", "!", "?", ")", "\""]),
    )
        .prop_map(|(open, body, close)| format!("{open}{body}{close}"))
}

/// Marks in the order the parser produces them, at least one per run.
fn mark_set() -> impl Strategy<Value = Vec<Mark>> {
    (vec(any::<bool>(), 6), "[a-z]{1,6}")
        .prop_filter("at least one mark", |(picked, _)| picked.iter().any(|on| *on))
        .prop_map(|(picked, path)| {
            let all = [
                Mark::link(format!("https://example.com/{path}")),
                Mark::Bold,
                Mark::Italic,
                Mark::Strike,
                Mark::Underline,
                Mark::Code,
            ];
            all.into_iter()
                .zip(picked)
                .filter_map(|(mark, on)| on.then_some(mark))
                .collect()
        })
}

fn marked_run() -> impl Strategy<Value = Node> {
    (marked_text(), mark_set()).prop_map(|(text, marks)| Node::text_with_marks(text, marks))
}

/// Plain text between marked runs. Neither edge is alphanumeric.
fn joiner() -> impl Strategy<Value = Option<String>> {
    prop_oneof![
        4 => prop::sample::select(vec![" ", ", ", "; ", " - ", " (", ") ", "! ", "!", " / ", ": "])
            .prop_map(|sep| Some(sep.to_string())),
        1 => Just(None::<String>),
    ]
}

/// Marked runs separated by plain text or hard breaks.
fn inline() -> impl Strategy<Value = Vec<Node>> {
    (
        any::<bool>(),
        marked_run(),
        vec((joiner(), marked_run()), 0..4),
        any::<bool>(),
    )
        .prop_map(|(lead_break, first, rest, trail_break)| {
            let mut children = Vec::new();
            if lead_break {
                children.push(Node::hard_break());
            }
            children.push(first);
            for (joiner, run) in rest {
                children.push(match joiner {
                    Some(text) => Node::text(text),
                    None => Node::hard_break(),
                });
                children.push(run);
            }
            if trail_break {
                children.push(Node::hard_break());
            }
            children
        })
}

fn paragraph() -> impl Strategy<Value = Node> {
    prop_oneof![
        2 => words().prop_map(|text| Node::paragraph(vec![Node::text(text)])),
        4 => inline().prop_map(Node::paragraph),
        1 => Just(Node::paragraph(Vec::new())),
        1 => Just(Node::paragraph(vec![Node::hard_break()])),
    ]
}

fn heading() -> impl Strategy<Value = Node> {
    prop_oneof![
        (1u8..=3, words()).prop_map(|(level, text)| Node::heading(level, vec![Node::text(text)])),
        (1u8..=3, inline()).prop_map(|(level, children)| Node::heading(level, children)),
    ]
}

fn code_block() -> impl Strategy<Value = Node> {
    ("[a-z]{1,6}", vec("[a-z][a-z ]{0,10}", 1..4))
        .prop_map(|(language, lines)| Node::code_block(language, &lines.join("\n")))
}

fn simple_items() -> impl Strategy<Value = Vec<Node>> {
    vec(
        words().prop_map(|text| Node::list_item(vec![Node::paragraph(vec![Node::text(text)])])),
        1..4,
    )
}

fn simple_list() -> impl Strategy<Value = Node> {
    prop_oneof![
        simple_items().prop_map(Node::bullet_list),
        (0u64..1000, simple_items()).prop_map(|(start, items)| Node::ordered_list(start, items)),
    ]
}

/// An item may hold a nested list, and an item whose only text lives in
/// that nested list starts with an empty paragraph.
fn item() -> impl Strategy<Value = Node> {
    prop_oneof![
        3 => words().prop_map(|text| Node::list_item(vec![Node::paragraph(vec![Node::text(text)])])),
        1 => inline().prop_map(|children| Node::list_item(vec![Node::paragraph(children)])),
        1 => (words(), simple_list()).prop_map(|(text, nested)| {
            Node::list_item(vec![Node::paragraph(vec![Node::text(text)]), nested])
        }),
        1 => simple_list().prop_map(|nested| {
            Node::list_item(vec![Node::paragraph(Vec::new()), nested])
        }),
    ]
}

fn list() -> impl Strategy<Value = Node> {
    prop_oneof![
        vec(item(), 1..4).prop_map(Node::bullet_list),
        (0u64..1000, vec(item(), 1..4)).prop_map(|(start, items)| Node::ordered_list(start, items)),
    ]
}

fn blockquote() -> impl Strategy<Value = Node> {
    vec(paragraph(), 1..3).prop_map(Node::blockquote)
}

fn cell(header: bool, text: String) -> Node {
    let children = if text.is_empty() {
        Vec::new()
    } else {
        vec![Node::text(text)]
    };
    cell_with(header, children)
}

fn cell_with(header: bool, children: Vec<Node>) -> Node {
    let content = vec![Node::paragraph(children)];
    if header {
        Node::table_header_cell(content)
    } else {
        Node::table_cell(content)
    }
}

fn cell_content() -> impl Strategy<Value = Vec<Node>> {
    prop_oneof![
        3 => "[a-z]{1,5}".prop_map(|text| vec![Node::text(text)]),
        1 => inline(),
    ]
}

/// Header cells may be empty, up to the whole header row.
fn header_content() -> impl Strategy<Value = Vec<Node>> {
    prop_oneof![
        3 => cell_content(),
        1 => Just(Vec::new()),
    ]
}

fn table() -> impl Strategy<Value = Node> {
    (1usize..4, any::<bool>()).prop_flat_map(|(width, with_header)| {
        let min_rows = usize::from(!with_header);
        (
            vec(header_content(), width),
            vec(vec(cell_content(), width), min_rows..3),
        )
            .prop_map(move |(header, body)| {
                let mut rows = Vec::new();
                if with_header {
                    rows.push(Node::table_row(
                        header.into_iter().map(|content| cell_with(true, content)).collect(),
                    ));
                }
                rows.extend(body.into_iter().map(|row| {
                    Node::table_row(
                        row.into_iter().map(|content| cell_with(false, content)).collect(),
                    )
                }));
                Node::table(rows)
            })
    })
}

fn block() -> impl Strategy<Value = Node> {
    prop_oneof![
        3 => paragraph(),
        1 => heading(),
        1 => code_block(),
        1 => list(),
        1 => blockquote(),
        1 => table(),
        1 => Just(Node::horizontal_rule()),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(proptest_config::cases()))]

    #[test]
    fn parse_of_render_is_identity(blocks in vec(block(), 0..8)) {
        let codec = codec();
        let doc = Node::doc(blocks);
        codec.registry().validate(&doc).unwrap();

        let markdown = codec.render(&doc);
        let parsed = codec.parse(&markdown).unwrap();
        prop_assert_eq!(parsed, doc, "markdown was:\n{}", markdown);
    }

    #[test]
    fn render_is_stable_after_one_pass(blocks in vec(block(), 1..6)) {
        let codec = codec();
        let first = codec.render(&Node::doc(blocks));
        let second = codec.render(&codec.parse(&first).unwrap());
        prop_assert_eq!(first, second);
    }
}

#[test]
fn separator_row_matches_table_width() {
    let codec = codec();
    for width in [1usize, 2, 5] {
        let header = Node::table_row(
            (0..width)
                .map(|i| cell(true, format!("h{i}")))
                .collect(),
        );
        let body = Node::table_row((0..width).map(|i| cell(false, format!("c{i}"))).collect());
        let markdown = codec.render(&Node::doc(vec![Node::table(vec![header, body])]));
        let separator = markdown.lines().nth(1).unwrap();
        assert_eq!(separator.matches("---").count(), width, "{markdown}");
    }
}

#[test]
fn headerless_table_gets_empty_header_row() {
    let codec = codec();
    let doc = Node::doc(vec![Node::table(vec![Node::table_row(vec![
        cell(false, "a".into()),
        cell(false, "b".into()),
    ])])]);
    let markdown = codec.render(&doc);
    assert_eq!(markdown, "|  |  |\n| --- | --- |\n| a | b |");
    assert_eq!(codec.parse(&markdown).unwrap(), doc);
}

#[test]
fn empty_table_renders_nothing() {
    let codec = codec();
    let doc = Node::doc(vec![
        Node::paragraph(vec![Node::text("before")]),
        Node::table(Vec::new()),
        Node::paragraph(vec![Node::text("after")]),
    ]);
    assert_eq!(codec.render(&doc), "before\n\nafter");
}

#[test]
fn adjacent_lists_stay_separate() {
    let codec = codec();
    let item = |text: &str| Node::list_item(vec![Node::paragraph(vec![Node::text(text)])]);
    let doc = Node::doc(vec![
        Node::bullet_list(vec![item("a")]),
        Node::bullet_list(vec![item("b")]),
        Node::ordered_list(3, vec![item("c")]),
        Node::ordered_list(1, vec![item("d")]),
    ]);
    let markdown = codec.render(&doc);
    assert_eq!(codec.parse(&markdown).unwrap(), doc, "{markdown}");
}
