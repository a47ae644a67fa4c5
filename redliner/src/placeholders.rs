//! Reversible escapes for punctuation that does not survive the model boundary.
//!
//! Outbound text (document, highlighted text, prompt) is encoded; narration and
//! every `new_text` coming back are decoded.

const PLACEHOLDERS: &[(char, &str)] = &[
    ('\r', "[u+000D]"),
    ('\u{201C}', "[u+201C]"),
    ('\u{201D}', "[u+201D]"),
    ('\u{2018}', "[u+2018]"),
    ('\u{2019}', "[u+2019]"),
    ('\u{2013}', "[u+2013]"),
    ('\u{2014}', "[u+2014]"),
    ('\u{2026}', "[u+2026]"),
];

pub fn encode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match PLACEHOLDERS.iter().find(|(c, _)| *c == ch) {
            Some((_, token)) => out.push_str(token),
            None => out.push(ch),
        }
    }
    out
}

pub fn decode(text: &str) -> String {
    if !text.contains("[u+") {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[u+") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match PLACEHOLDERS
            .iter()
            .find(|(_, token)| tail.starts_with(token))
        {
            Some((ch, token)) => {
                out.push(*ch);
                rest = &tail[token.len()..];
            }
            None => {
                out.push_str("[u+");
                rest = &tail[3..];
            }
        }
    }
    out.push_str(rest);
    out
}
