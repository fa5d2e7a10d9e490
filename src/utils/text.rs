use unicode_width::UnicodeWidthStr;

/// Left-align `text` in a column `width` display cells wide.
pub fn pad_to_width(text: &str, width: usize) -> String {
    let pad = width.saturating_sub(UnicodeWidthStr::width(text));
    format!("{}{}", text, " ".repeat(pad))
}

/// Two-column table with a header row and a rule, one line per row.
pub fn render_table(headers: (&str, &str), rows: &[(String, String)]) -> String {
    let key_width = rows
        .iter()
        .map(|(key, _)| UnicodeWidthStr::width(key.as_str()))
        .max()
        .unwrap_or(0)
        .max(UnicodeWidthStr::width(headers.0));

    let header = format!("{} | {}", pad_to_width(headers.0, key_width), headers.1);
    let mut out = String::new();
    out.push_str(&header);
    out.push('\n');
    out.push_str(&"-".repeat(UnicodeWidthStr::width(header.as_str()).max(key_width + 3)));
    out.push('\n');
    for (key, value) in rows {
        out.push_str(&format!("{} | {}\n", pad_to_width(key, key_width), value));
    }
    out
}
