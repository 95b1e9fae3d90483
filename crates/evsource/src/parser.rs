// Field parser — incremental state machine over the SSE wire grammar.

/// A single parsed item from the stream.
///
/// The parser is purely syntactic: it splits lines, strips the optional
/// value space, and recognizes the five field names. It never interprets
/// values — `Retry` carries the raw text, validation happens in the
/// [`EventBuilder`](crate::event::EventBuilder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    /// A `data:` line.
    Data(String),
    /// An `event:` line.
    EventType(String),
    /// An `id:` line.
    Id(String),
    /// A `retry:` line, value still unparsed.
    Retry(String),
    /// A `:`-prefixed comment line.
    Comment(String),
    /// A blank line — the accumulated fields form an event.
    Dispatch,
}

/// Incremental parser over arbitrarily chunked bytes.
///
/// Lines may straddle chunk boundaries, so the parser persists the current
/// line accumulator, whether the last byte seen was a `\r` (to swallow the
/// `\n` of a split `\r\n`), and whether the leading BOM has been checked.
///
/// Per the grammar, lines end with `\n`, `\r`, or `\r\n`; a single leading
/// UTF-8 BOM on the first line is skipped; unknown field names are dropped.
/// A partial unterminated line at end of input is not a field —
/// [`ended_clean`](Self::ended_clean) reports whether anything was left
/// behind.
#[derive(Debug, Default)]
pub struct FieldParser {
    line: Vec<u8>,
    pending_cr: bool,
    bom_checked: bool,
}

impl FieldParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk. Returns every field completed by it, in order.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Field> {
        let mut fields = Vec::new();
        for &byte in chunk {
            if self.pending_cr {
                self.pending_cr = false;
                if byte == b'\n' {
                    // Second half of \r\n; the line already ended at the \r.
                    continue;
                }
            }
            match byte {
                b'\r' => {
                    self.pending_cr = true;
                    self.end_line(&mut fields);
                }
                b'\n' => self.end_line(&mut fields),
                _ => self.line.push(byte),
            }
        }
        fields
    }

    /// Whether the input so far ends on a line boundary. A partial final
    /// line means the stream was cut mid-block.
    pub fn ended_clean(&self) -> bool {
        self.line.is_empty()
    }

    fn end_line(&mut self, out: &mut Vec<Field>) {
        let mut line: &[u8] = &self.line;
        if !self.bom_checked {
            self.bom_checked = true;
            if line.starts_with(&[0xEF, 0xBB, 0xBF]) {
                line = &line[3..];
            }
        }

        if line.is_empty() {
            out.push(Field::Dispatch);
        } else if line[0] == b':' {
            out.push(Field::Comment(decode_value(&line[1..])));
        } else {
            let (name, value) = match line.iter().position(|&b| b == b':') {
                Some(colon) => (&line[..colon], &line[colon + 1..]),
                None => (line, &[][..]),
            };
            let field = match name {
                b"data" => Some(Field::Data(decode_value(value))),
                b"event" => Some(Field::EventType(decode_value(value))),
                b"id" => Some(Field::Id(decode_value(value))),
                b"retry" => Some(Field::Retry(decode_value(value))),
                _ => None,
            };
            out.extend(field);
        }
        self.line.clear();
    }
}

/// Strip the single optional space after the colon and decode as UTF-8.
fn decode_value(value: &[u8]) -> String {
    let value = value.strip_prefix(b" ").unwrap_or(value);
    String::from_utf8_lossy(value).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Field> {
        FieldParser::new().feed(input)
    }

    #[test]
    fn simple_fields_and_dispatch() {
        let fields = parse_all(b"event: test\ndata: hello\n\n");
        assert_eq!(
            fields,
            vec![
                Field::EventType("test".into()),
                Field::Data("hello".into()),
                Field::Dispatch,
            ]
        );
    }

    #[test]
    fn value_space_is_optional_and_single() {
        assert_eq!(parse_all(b"data:hello\n"), vec![Field::Data("hello".into())]);
        assert_eq!(parse_all(b"data: hello\n"), vec![Field::Data("hello".into())]);
        // Only one space is stripped.
        assert_eq!(
            parse_all(b"data:  hello\n"),
            vec![Field::Data(" hello".into())]
        );
    }

    #[test]
    fn line_terminators_are_equivalent() {
        let lf = parse_all(b"data: a\ndata: b\n\n");
        let cr = parse_all(b"data: a\rdata: b\r\r");
        let crlf = parse_all(b"data: a\r\ndata: b\r\n\r\n");
        assert_eq!(lf, cr);
        assert_eq!(lf, crlf);
    }

    #[test]
    fn crlf_split_across_chunks() {
        let mut parser = FieldParser::new();
        let mut fields = parser.feed(b"data: hello\r");
        assert_eq!(fields, vec![Field::Data("hello".into())]);
        // The \n completes the \r\n pair and must not produce a blank line.
        fields = parser.feed(b"\ndata: next\n");
        assert_eq!(fields, vec![Field::Data("next".into())]);
    }

    #[test]
    fn field_split_across_chunks() {
        let mut parser = FieldParser::new();
        assert!(parser.feed(b"eve").is_empty());
        assert!(parser.feed(b"nt: mess").is_empty());
        assert_eq!(
            parser.feed(b"age\n"),
            vec![Field::EventType("message".into())]
        );
    }

    #[test]
    fn leading_bom_is_skipped_once() {
        let fields = parse_all(b"\xEF\xBB\xBFdata: x\n");
        assert_eq!(fields, vec![Field::Data("x".into())]);
        // A BOM later in the stream is part of the field name.
        let fields = parse_all(b"data: x\n\xEF\xBB\xBFdata: y\n");
        assert_eq!(fields, vec![Field::Data("x".into())]);
    }

    #[test]
    fn comment_lines() {
        let fields = parse_all(b": keep-alive\ndata: x\n\n");
        assert_eq!(
            fields,
            vec![
                Field::Comment("keep-alive".into()),
                Field::Data("x".into()),
                Field::Dispatch,
            ]
        );
    }

    #[test]
    fn line_without_colon_is_name_with_empty_value() {
        assert_eq!(parse_all(b"data\n"), vec![Field::Data(String::new())]);
        // Unknown names are dropped whether or not they carry a value.
        assert!(parse_all(b"unknown\nunknown: value\n").is_empty());
    }

    #[test]
    fn empty_field_value() {
        assert_eq!(parse_all(b"id:\n"), vec![Field::Id(String::new())]);
        assert_eq!(parse_all(b"id: \n"), vec![Field::Id(String::new())]);
    }

    #[test]
    fn partial_final_line_is_dirty() {
        let mut parser = FieldParser::new();
        let fields = parser.feed(b"data: done\n\ndata: partial");
        assert_eq!(
            fields,
            vec![Field::Data("done".into()), Field::Dispatch]
        );
        assert!(!parser.ended_clean());
    }

    #[test]
    fn terminated_final_line_is_clean() {
        let mut parser = FieldParser::new();
        parser.feed(b"data: hello\n");
        assert!(parser.ended_clean());
        // A trailing \r also terminates the line.
        let mut parser = FieldParser::new();
        parser.feed(b"data: hello\r");
        assert!(parser.ended_clean());
    }

    #[test]
    fn value_may_contain_colons() {
        let fields = parse_all(b"data: a:b:c\n");
        assert_eq!(fields, vec![Field::Data("a:b:c".into())]);
    }

    // Serializing parsed fields back to wire form and re-parsing is
    // identity on LF-normalized input.
    #[test]
    fn round_trip_on_normalized_input() {
        let input: &[u8] =
            b"retry: 1000\n\nevent: test\ndata: something\nid: 1\n\ndata: a\ndata: b\n\n";
        let fields = parse_all(input);

        let mut wire = String::new();
        for field in &fields {
            match field {
                Field::Data(v) => wire.push_str(&format!("data: {v}\n")),
                Field::EventType(v) => wire.push_str(&format!("event: {v}\n")),
                Field::Id(v) => wire.push_str(&format!("id: {v}\n")),
                Field::Retry(v) => wire.push_str(&format!("retry: {v}\n")),
                Field::Comment(v) => wire.push_str(&format!(": {v}\n")),
                Field::Dispatch => wire.push('\n'),
            }
        }
        assert_eq!(parse_all(wire.as_bytes()), fields);
    }
}
