use opsagent_engine::agent::compress::truncate_result;
use opsagent_engine::agent::stream::{Segment, ThinkSplitter, ToolCallAccumulator};
use opsagent_engine::agent::redact::clean_text;
use opsagent_engine::agent::Redactor;
use opsagent_engine::llm::ToolCallFragment;
use proptest::prelude::*;
use serde_json::Value;

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[ -~\\n\\t\\u{0}-\\u{1f}]{0,80}".prop_map(Value::String),
        "(token|password|secret|note)[a-z ]{40,60}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("(api_key|user|Password|path|x)[0-9]?", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    // Name and argument pieces for one index concatenate in arrival order
    #[test]
    fn test_fragment_assembly_concatenates(
        pieces in prop::collection::vec(("[a-z_]{0,4}", "[ -~]{0,8}"), 1..12),
        id in "call_[a-z0-9]{4}",
    ) {
        let mut acc = ToolCallAccumulator::new();
        for (i, (name, args)) in pieces.iter().enumerate() {
            acc.push(&ToolCallFragment {
                index: 0,
                id: (i == 0).then(|| id.clone()),
                name: Some(name.clone()),
                arguments: Some(args.clone()),
            });
        }

        let calls = acc.finish();
        prop_assert_eq!(calls.len(), 1);
        let expected_name: String = pieces.iter().map(|(n, _)| n.as_str()).collect();
        let expected_args: String = pieces.iter().map(|(_, a)| a.as_str()).collect();
        prop_assert_eq!(&calls[0].name, &expected_name);
        prop_assert_eq!(&calls[0].arguments, &expected_args);
        prop_assert_eq!(&calls[0].id, &id);
    }

    // Redacting twice gives the same result as redacting once
    #[test]
    fn test_redaction_is_idempotent(value in json_value()) {
        let redactor = Redactor::default();
        let once = redactor.redact(&value);
        prop_assert_eq!(redactor.redact(&once), once);
    }

    // Invisible and separator characters vanish; visible text survives in order
    #[test]
    fn test_clean_text_keeps_only_printable(
        pieces in prop::collection::vec(
            ("[a-zA-Z0-9 .,\n\t\u{e9}\u{4e2d}]{0,6}", prop::sample::select(vec![
                '\u{0}', '\u{7}', '\u{7f}', '\u{ad}', '\u{200b}', '\u{200e}', '\u{202e}',
                '\u{2028}', '\u{2029}', '\u{a0}', '\u{3000}', '\u{feff}', '\u{e000}',
                '\u{f8ff}', '\u{0378}',
            ])),
            0..10,
        ),
    ) {
        let mut input = String::new();
        let mut expected = String::new();
        for (visible, hidden) in &pieces {
            input.push_str(visible);
            input.push(*hidden);
            expected.push_str(visible);
        }

        let cleaned = clean_text(&input);
        prop_assert_eq!(&cleaned, &expected);
        prop_assert_eq!(clean_text(&cleaned), cleaned);
    }

    // Truncation triggers exactly when the serialized size exceeds the threshold
    #[test]
    fn test_truncation_threshold(len in 0usize..400, max in 1usize..300) {
        let serialized = "y".repeat(len);
        match truncate_result(&serialized, max) {
            None => prop_assert!(len <= max),
            Some(stand_in) => {
                prop_assert!(len > max);
                prop_assert_eq!(stand_in["original_length"].as_u64(), Some(len as u64));
                let data = stand_in["data"].as_str().unwrap_or_default();
                prop_assert!(data.starts_with(&"y".repeat(max)));
                prop_assert!(!data.starts_with(&"y".repeat(max + 1)));
            }
        }
    }

    // However the text is chunked, the split into reasoning and answer is the same
    #[test]
    fn test_think_split_is_chunking_independent(
        before in "[a-z <]{0,10}",
        thought in "[a-z <]{0,10}",
        after in "[a-z <]{0,10}",
        cuts in prop::collection::vec(0usize..64, 0..6),
    ) {
        let text = format!("{}<think>{}</think>{}", before, thought, after);

        let whole = split(&[text.as_str()]);

        let mut cuts: Vec<usize> = cuts.into_iter().map(|c| c % (text.len() + 1)).collect();
        cuts.sort_unstable();
        cuts.dedup();
        let mut chunks = Vec::new();
        let mut start = 0;
        for cut in cuts {
            chunks.push(&text[start..cut]);
            start = cut;
        }
        chunks.push(&text[start..]);

        prop_assert_eq!(split(&chunks), whole);
    }
}

/// Concatenated (think, say) text for a sequence of deltas
fn split(chunks: &[&str]) -> (String, String) {
    let mut splitter = ThinkSplitter::new();
    let mut think = String::new();
    let mut say = String::new();
    let mut segments = Vec::new();
    for chunk in chunks {
        segments.extend(splitter.push(chunk));
    }
    segments.extend(splitter.finish());
    for segment in segments {
        match segment {
            Segment::Think(t) => think.push_str(&t),
            Segment::Say(s) => say.push_str(&s),
        }
    }
    (think, say)
}
