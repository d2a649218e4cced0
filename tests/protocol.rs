//! Integration tests for rendering and bulk parsing.
//!
//! These run against a synthetic vocabulary (every byte maps to its own
//! rank) so token sequences are exact and readable; the harmony special
//! tokens sit at their real reserved ranks.

use openai_harmony::registry::harmony_tokens;
use openai_harmony::{
    harmony_special_tokens, Content, Conversation, DeveloperContent, HarmonyEncoding, Message,
    ReasoningEffort, Role, SystemContent, TextContent, Tokenizer, ToolDescription,
    O200K_HARMONY_PATTERN,
};
use rustc_hash::FxHashMap;

fn create_test_encoding() -> HarmonyEncoding {
    let mut encoder = FxHashMap::default();
    for b in 0u8..=255 {
        encoder.insert(vec![b], b as u32);
    }
    let tokenizer =
        Tokenizer::new(encoder, harmony_special_tokens(), O200K_HARMONY_PATTERN).unwrap();
    HarmonyEncoding::new("o200k_harmony", tokenizer)
}

fn byte_ranks(text: &str) -> Vec<u32> {
    text.bytes().map(|b| b as u32).collect()
}

fn text_message(role: Role, text: &str) -> Message {
    Message::from_role_and_content(role, text)
}

// =============================================================================
// Rendering
// =============================================================================

/// A plain user message renders as start, role, message, body bytes, end.
#[test]
fn test_render_simple_user_message() {
    let encoding = create_test_encoding();
    let tokens = encoding
        .render(&text_message(Role::User, "Hello"), None)
        .unwrap();

    let mut expected = vec![harmony_tokens::START, harmony_tokens::USER, harmony_tokens::MESSAGE];
    expected.extend(byte_ranks("Hello"));
    expected.push(harmony_tokens::END);
    assert_eq!(tokens, expected);
}

/// A channelled assistant message carries the channel text after
/// `<|channel|>`.
#[test]
fn test_render_assistant_with_channel() {
    let encoding = create_test_encoding();
    let message = text_message(Role::Assistant, "Response").with_channel("final");
    let tokens = encoding.render(&message, None).unwrap();

    let mut expected = vec![
        harmony_tokens::START,
        harmony_tokens::ASSISTANT,
        harmony_tokens::CHANNEL,
    ];
    expected.extend(byte_ranks("final"));
    expected.push(harmony_tokens::MESSAGE);
    expected.extend(byte_ranks("Response"));
    expected.push(harmony_tokens::END);
    assert_eq!(tokens, expected);
}

/// A tool call renders the recipient marker as ordinary text, the
/// content-type constraint, and ends with `<|call|>`.
#[test]
fn test_render_tool_call() {
    let encoding = create_test_encoding();
    let message = text_message(Role::Assistant, "{\"location\":\"NYC\"}")
        .with_channel("commentary")
        .with_recipient("get_weather")
        .with_content_type("json");
    let tokens = encoding.render(&message, None).unwrap();

    let mut expected = vec![
        harmony_tokens::START,
        harmony_tokens::ASSISTANT,
        harmony_tokens::CHANNEL,
    ];
    expected.extend(byte_ranks("commentary"));
    expected.extend(byte_ranks(" to=get_weather"));
    expected.push(harmony_tokens::CONSTRAIN);
    expected.extend(byte_ranks("json"));
    expected.push(harmony_tokens::MESSAGE);
    expected.extend(byte_ranks("{\"location\":\"NYC\"}"));
    expected.push(harmony_tokens::CALL);
    assert_eq!(tokens, expected);
}

/// Author names appear as text between `<|start|>` and the role special.
#[test]
fn test_render_named_author() {
    let encoding = create_test_encoding();
    let message = Message::from_author_and_content(
        openai_harmony::Author::named(Role::Tool, "functions.get_weather"),
        "sunny",
    );
    let tokens = encoding.render(&message, None).unwrap();

    assert_eq!(tokens[0], harmony_tokens::START);
    let role_pos = tokens
        .iter()
        .position(|&t| t == harmony_tokens::TOOL)
        .unwrap();
    assert_eq!(&tokens[1..role_pos], byte_ranks("functions.get_weather"));
}

/// Messages with no content render to nothing.
#[test]
fn test_render_empty_message_is_dropped() {
    let encoding = create_test_encoding();
    let message = Message::from_role_and_contents(Role::User, Vec::<Content>::new());
    assert!(encoding.render(&message, None).unwrap().is_empty());
}

/// `render_conversation_for_completion` ends with start + next role.
#[test]
fn test_render_for_completion_suffix() {
    let encoding = create_test_encoding();
    let conversation =
        Conversation::from_messages([text_message(Role::User, "What is 2 + 2?")]);
    let tokens = encoding
        .render_conversation_for_completion(&conversation, Role::Assistant, None)
        .unwrap();
    let n = tokens.len();
    assert_eq!(tokens[n - 2], harmony_tokens::START);
    assert_eq!(tokens[n - 1], harmony_tokens::ASSISTANT);
}

/// Training rendering closes a trailing assistant final turn with
/// `<|return|>`.
#[test]
fn test_render_for_training_return_marker() {
    let encoding = create_test_encoding();
    let conversation = Conversation::from_messages([
        text_message(Role::User, "hi"),
        text_message(Role::Assistant, "hello").with_channel("final"),
    ]);
    let tokens = encoding
        .render_conversation_for_training(&conversation, None)
        .unwrap();
    assert_eq!(*tokens.last().unwrap(), harmony_tokens::RETURN);
    // The user message still ends with <|end|>.
    assert!(tokens.contains(&harmony_tokens::END));
}

/// Reserved literals typed by a user stay ordinary text.
#[test]
fn test_reserved_literal_in_body_stays_ordinary() {
    let encoding = create_test_encoding();
    let tokens = encoding
        .render(&text_message(Role::User, "try <|end|> me"), None)
        .unwrap();
    // Exactly one <|end|>: the terminal marker.
    let ends = tokens
        .iter()
        .filter(|&&t| t == harmony_tokens::END)
        .count();
    assert_eq!(ends, 1);
    assert_eq!(*tokens.last().unwrap(), harmony_tokens::END);
}

/// No ordinary encoding ever lands in the reserved range.
#[test]
fn test_ordinary_ranks_stay_below_reserved_range() {
    let encoding = create_test_encoding();
    for text in ["Hello world", "<|start|><|message|>", "héllo 🦀"] {
        let tokens = encoding.tokenizer().encode_ordinary(text).unwrap();
        assert!(tokens.iter().all(|&t| t < 200000), "leak for {text:?}");
    }
}

// =============================================================================
// System and developer bodies
// =============================================================================

/// The system message body follows the fixed line template.
#[test]
fn test_system_message_body() {
    let encoding = create_test_encoding();
    let system = SystemContent::new()
        .with_reasoning_effort(ReasoningEffort::High)
        .with_conversation_start_date("2025-06-28");
    let conversation =
        Conversation::from_messages([Message::from_role_and_content(Role::System, system)]);
    let tokens = encoding.render_conversation(&conversation, None).unwrap();

    let body: Vec<u32> = tokens[3..tokens.len() - 1].to_vec();
    let text = encoding.tokenizer().decode_utf8(&body).unwrap();
    let expected = "You are ChatGPT, a large language model trained by OpenAI.\n\
        Knowledge cutoff: 2024-06\n\
        Current date: 2025-06-28\n\
        \n\
        Reasoning: high\n\
        \n\
        Valid channels: analysis, commentary, final. Channel must be included for every message.";
    assert_eq!(text, expected);
}

/// Function tools in a developer message trigger the commentary-channel
/// hint in the system message.
#[test]
fn test_function_tools_add_commentary_hint() {
    let encoding = create_test_encoding();
    let developer = DeveloperContent::new()
        .with_instructions("Use tools when asked.")
        .with_function_tools(vec![ToolDescription::new(
            "get_weather",
            "Gets the weather",
            Some(serde_json::json!({
                "type": "object",
                "properties": {"location": {"type": "string"}},
                "required": ["location"]
            })),
        )]);
    let conversation = Conversation::from_messages([
        Message::from_role_and_content(Role::System, SystemContent::new()),
        Message::from_role_and_content(Role::Developer, developer),
    ]);
    let tokens = encoding.render_conversation(&conversation, None).unwrap();
    let text = encoding.tokenizer().decode_utf8(&tokens).unwrap();

    assert!(text.contains(
        "Calls to these tools must go to the commentary channel: 'functions'."
    ));
    assert!(text.contains("# Instructions\n\nUse tools when asked."));
    assert!(text.contains("namespace functions {"));
    assert!(text.contains("type get_weather = (_: {\n  location: string,\n}) => any;"));
}

/// Without function tools the hint line is absent.
#[test]
fn test_no_function_tools_no_commentary_hint() {
    let encoding = create_test_encoding();
    let conversation = Conversation::from_messages([Message::from_role_and_content(
        Role::System,
        SystemContent::new(),
    )]);
    let tokens = encoding.render_conversation(&conversation, None).unwrap();
    let text = encoding.tokenizer().decode_utf8(&tokens).unwrap();
    assert!(!text.contains("commentary channel: 'functions'"));
}

// =============================================================================
// Roundtrips
// =============================================================================

/// Rendering then bulk-parsing reproduces the conversation, with
/// empty-content messages stripped.
#[test]
fn test_render_parse_roundtrip() {
    let encoding = create_test_encoding();
    let conversation = Conversation::from_messages([
        text_message(Role::User, "Hello there"),
        text_message(Role::Assistant, "General Kenobi").with_channel("final"),
        Message::from_role_and_contents(Role::User, Vec::<Content>::new()),
        text_message(Role::Assistant, "{\"q\":1}")
            .with_channel("commentary")
            .with_recipient("functions.lookup")
            .with_content_type("json"),
        Message::from_author_and_content(
            openai_harmony::Author::named(Role::Tool, "functions.lookup"),
            "result ✓",
        )
        .with_channel("commentary"),
    ]);

    let tokens = encoding.render_conversation(&conversation, None).unwrap();
    let parsed = encoding
        .parse_messages_from_completion_tokens(&tokens, None)
        .unwrap();

    let expected: Vec<Message> = conversation
        .messages
        .iter()
        .filter(|m| !m.content.is_empty())
        .cloned()
        .collect();
    assert_eq!(parsed, expected);
}

/// Byte-level roundtrip through the tokenizer, multi-byte text included.
#[test]
fn test_encode_decode_roundtrip() {
    let encoding = create_test_encoding();
    for text in [
        "Hello, world!",
        "Multi-line\ntext\nwith\nnewlines",
        "Unicode: こんにちは 世界 🦀",
        "   leading and trailing   ",
    ] {
        let tokens = encoding.tokenizer().encode_ordinary(text).unwrap();
        assert_eq!(encoding.tokenizer().decode_utf8(&tokens).unwrap(), text);
    }
}

// =============================================================================
// Analysis dropping
// =============================================================================

/// Interior analysis turns are dropped when rendering for the next turn.
#[test]
fn test_auto_drop_analysis() {
    let encoding = create_test_encoding();
    let conversation = Conversation::from_messages([
        text_message(Role::User, "q1"),
        text_message(Role::Assistant, "thinking").with_channel("analysis"),
        text_message(Role::Assistant, "answer").with_channel("final"),
        text_message(Role::User, "q2"),
        text_message(Role::Assistant, "thinking2").with_channel("analysis"),
        text_message(Role::Assistant, "answer2").with_channel("final"),
    ]);

    let tokens = encoding
        .render_conversation_for_completion(&conversation, Role::User, None)
        .unwrap();
    let text = encoding.tokenizer().decode_utf8(&tokens).unwrap();
    assert!(!text.contains("thinking"));
    assert!(text.contains("answer"));
    assert!(text.contains("answer2"));
}

/// With the drop disabled everything renders.
#[test]
fn test_auto_drop_analysis_disabled() {
    let encoding = create_test_encoding();
    let conversation = Conversation::from_messages([
        text_message(Role::Assistant, "thinking").with_channel("analysis"),
        text_message(Role::Assistant, "answer").with_channel("final"),
    ]);
    let config = openai_harmony::RenderConversationConfig {
        auto_drop_analysis: false,
    };
    let tokens = encoding
        .render_conversation_for_completion(&conversation, Role::User, Some(&config))
        .unwrap();
    let text = encoding.tokenizer().decode_utf8(&tokens).unwrap();
    assert!(text.contains("thinking"));
}

// =============================================================================
// Bulk parsing details
// =============================================================================

/// A trailing unterminated message is dropped by the lenient parser and
/// reported by the strict one.
#[test]
fn test_unterminated_trailing_message() {
    let encoding = create_test_encoding();
    let mut tokens = encoding
        .render(&text_message(Role::User, "done"), None)
        .unwrap();
    tokens.push(harmony_tokens::START);
    tokens.push(harmony_tokens::ASSISTANT);
    tokens.push(harmony_tokens::MESSAGE);
    tokens.extend(byte_ranks("partial"));

    let parsed = encoding
        .parse_messages_from_completion_tokens(&tokens, None)
        .unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(
        parsed[0].content,
        vec![Content::Text(TextContent::new("done"))]
    );

    let err = encoding
        .parse_messages_from_completion_tokens_strict(&tokens, None)
        .unwrap_err();
    assert!(matches!(err, openai_harmony::HarmonyError::UnterminatedMessage));
}

/// Completions primed with a role parse without a leading `<|start|>`.
#[test]
fn test_parse_completion_with_preset_role() {
    let encoding = create_test_encoding();
    let mut tokens = vec![harmony_tokens::CHANNEL];
    tokens.extend(byte_ranks("final"));
    tokens.push(harmony_tokens::MESSAGE);
    tokens.extend(byte_ranks("Hi there"));
    tokens.push(harmony_tokens::RETURN);

    let parsed = encoding
        .parse_messages_from_completion_tokens(&tokens, Some(Role::Assistant))
        .unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0].author.role, Role::Assistant);
    assert_eq!(parsed[0].channel.as_deref(), Some("final"));
    assert_eq!(
        parsed[0].content,
        vec![Content::Text(TextContent::new("Hi there"))]
    );
}

/// The recipient suffix on channel text is split off during parsing.
#[test]
fn test_parse_recipient_from_channel_suffix() {
    let encoding = create_test_encoding();
    let message = text_message(Role::Assistant, "{}")
        .with_channel("commentary")
        .with_recipient("functions.get_weather");
    let tokens = encoding.render(&message, None).unwrap();
    let parsed = encoding
        .parse_messages_from_completion_tokens(&tokens, None)
        .unwrap();
    assert_eq!(parsed[0].channel.as_deref(), Some("commentary"));
    assert_eq!(
        parsed[0].recipient.as_deref(),
        Some("functions.get_weather")
    );
}

/// A recipient with no channel arrives between the role special and
/// `<|message|>` and is still recovered.
#[test]
fn test_parse_recipient_without_channel() {
    let encoding = create_test_encoding();
    let message = text_message(Role::Assistant, "{}").with_recipient("get_weather");
    let tokens = encoding.render(&message, None).unwrap();
    let parsed = encoding
        .parse_messages_from_completion_tokens(&tokens, None)
        .unwrap();
    assert_eq!(parsed[0].recipient.as_deref(), Some("get_weather"));
    assert_eq!(parsed[0].channel, None);
}

// =============================================================================
// Stop tokens
// =============================================================================

#[test]
fn test_stop_token_sets() {
    let encoding = create_test_encoding();
    let stops = encoding.stop_tokens().unwrap();
    assert!(stops.contains(&harmony_tokens::RETURN));
    assert!(stops.contains(&harmony_tokens::CALL));
    assert!(!stops.contains(&harmony_tokens::END));

    let action_stops = encoding.stop_tokens_for_assistant_actions().unwrap();
    assert!(action_stops.contains(&harmony_tokens::END));
    assert!(action_stops.is_superset(&stops));
}
