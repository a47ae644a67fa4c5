use shared_types::TurnRequest;

use crate::placeholders;

pub const UNCHANGED_DOCUMENT_NOTE: &str = "<note>The Word document content is unchanged since your last response. Refer to the previous <word_document> in this conversation.</note>";

pub const SYSTEM_PROMPT: &str = r#"You are a Redliner Agent. You answer questions about Word documents and propose modifications to them.

## Input
- <word_document>: the document, one addressable unit per line
  - Plain paragraphs: p0, p1, p2... numbered by absolute document position
  - Tables: t0, t1... (shown for context only)
  - Table cell paragraphs: t0.r1.c2.p0 (table 0, row 1, column 2, paragraph 0 of that cell)
  Cell paragraphs count toward global paragraph numbering but restart at p0 inside every cell.
- <highlighted>: text the user has selected, if any
- <user_input>: the request
- <note>: present when the document is unchanged since your last response; use the previous <word_document>

## Behaviour
1. Questions only: answer directly and do not call microsoft_actions_tool.
2. Modifications only: briefly explain the changes, then call microsoft_actions_tool ONCE with every action.
3. Both: answer every question first, then explain and submit all modifications in one call.
Do not write anything after calling microsoft_actions_tool.

## microsoft_actions_tool
Pass `actions` as a JSON list. Each action:
{
  "task": "short description",
  "action": "replace|append|prepend|delete|highlight|format_bold|format_italic|strikethrough|delete_row|insert_row|create_table|delete_table",
  "loc": "p5 | t0.r1.c2.p0 | t0.r2",
  "new_text": "text for replace/append/prepend",
  "withinPara": {"find": "exact text", "occurrence": 0},
  "rowData": [["cell", "cell"]],
  "comment": "optional reviewer note"
}

## Locations
- p<N> for plain paragraphs, t<T>.r<R>.c<C>.p<P> for cell paragraphs.
- t<T>.r<R> only for delete_row, insert_row (inserts after that row) and delete_table.
- create_table targets a plain paragraph p<N>; the table is inserted after it, built from rowData.
- Never address a bare table such as "t0".
- Only use locations that exist in the current <word_document>. Actions run in list order against the original addressing.
- Each location appears at most once per batch unless separated by different withinPara occurrences.

## withinPara
Use it for surgical edits (typos, terms, cross-references). `find` is the smallest unique text, `occurrence` is zero-based. Do not use it when rewriting most of a paragraph, and never let two finds in the same paragraph overlap.

## Text
- To append on a new line, start new_text with "\n".
- Escapes such as [u+201C] stand for typographic characters. Keep them exactly as written.
- Keep narration short and never mention paragraph indices to the user.
"#;

fn highlighted_section(request: &TurnRequest) -> String {
    match request.highlighted.as_deref().filter(|h| !h.is_empty()) {
        Some(text) => format!("<highlighted>{}</highlighted>", placeholders::encode(text)),
        None => String::new(),
    }
}

/// User message for one turn. `send_full_document` controls whether the
/// document body is included or replaced by the unchanged note.
pub fn compose_user_message(request: &TurnRequest, send_full_document: bool) -> String {
    let highlighted = highlighted_section(request);
    let prompt = placeholders::encode(&request.prompt);

    if send_full_document {
        format!(
            "<word_document>{}</word_document>\n{}\n<user_input>{}</user_input>",
            placeholders::encode(&request.word_document),
            highlighted,
            prompt
        )
    } else {
        format!("{highlighted}\n<user_input>{prompt}</user_input>\n\n{UNCHANGED_DOCUMENT_NOTE}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TurnRequest {
        TurnRequest {
            prompt: "Fix \u{201C}it\u{201D}".to_string(),
            word_document: "p0: Title\u{2014}Draft".to_string(),
            highlighted: Some("Draft".to_string()),
            model: None,
            document_hash: Some("h1".to_string()),
        }
    }

    #[test]
    fn test_full_document_message() {
        let message = compose_user_message(&request(), true);
        assert_eq!(
            message,
            "<word_document>p0: Title[u+2014]Draft</word_document>\n<highlighted>Draft</highlighted>\n<user_input>Fix [u+201C]it[u+201D]</user_input>"
        );
    }

    #[test]
    fn test_unchanged_document_message() {
        let message = compose_user_message(&request(), false);
        assert!(message.starts_with("<highlighted>Draft</highlighted>\n<user_input>"));
        assert!(message.ends_with(UNCHANGED_DOCUMENT_NOTE));
        assert!(!message.contains("<word_document>p0"));
    }

    #[test]
    fn test_empty_highlight_is_omitted() {
        let mut req = request();
        req.highlighted = Some(String::new());
        let message = compose_user_message(&req, true);
        assert!(message.contains("</word_document>\n\n<user_input>"));
    }
}
