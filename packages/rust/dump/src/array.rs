//! Incremental reader for a top-level JSON array.

use std::io::BufRead;
use std::marker::PhantomData;
use std::path::PathBuf;

use paperlink_shared::{PaperLinkError, Result};
use serde::de::DeserializeOwned;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Before the opening `[`.
    Start,
    /// After `[`, before the first element or `]`.
    First,
    /// After an element, expecting `,` or `]`.
    Rest,
    Done,
}

/// Yields the elements of a JSON array one at a time.
///
/// Elements are expected to be JSON objects: each is handed to a fresh
/// `serde_json` deserializer over the same buffered reader, which stops right
/// after the closing `}` without reading ahead. Memory use is bounded by the
/// largest single element.
pub struct JsonArrayReader<R, T> {
    reader: R,
    /// Label used in error messages (normally the file path).
    source: PathBuf,
    state: State,
    index: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<R: BufRead, T: DeserializeOwned> JsonArrayReader<R, T> {
    pub fn new(reader: R, source: impl Into<PathBuf>) -> Self {
        Self {
            reader,
            source: source.into(),
            state: State::Start,
            index: 0,
            _marker: PhantomData,
        }
    }

    /// Number of elements decoded so far.
    pub fn position(&self) -> usize {
        self.index
    }

    /// Skip whitespace and return the next significant byte without consuming it.
    fn peek_significant(&mut self) -> Result<Option<u8>> {
        loop {
            let (skip, len, next) = {
                let buf = self
                    .reader
                    .fill_buf()
                    .map_err(|e| PaperLinkError::io(&self.source, e))?;
                if buf.is_empty() {
                    return Ok(None);
                }
                let skip = buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
                (skip, buf.len(), buf.get(skip).copied())
            };

            match next {
                Some(byte) => {
                    self.reader.consume(skip);
                    return Ok(Some(byte));
                }
                None => self.reader.consume(len),
            }
        }
    }

    fn syntax_error(&self, what: &str) -> PaperLinkError {
        PaperLinkError::parse(format!(
            "{}: record {}: {what}",
            self.source.display(),
            self.index
        ))
    }

    fn expect_byte(&mut self) -> Result<u8> {
        self.peek_significant()?
            .ok_or_else(|| self.syntax_error("unexpected end of input"))
    }

    fn read_element(&mut self) -> Result<T> {
        let decoded = {
            let mut de = serde_json::Deserializer::from_reader(&mut self.reader);
            T::deserialize(&mut de)
        };
        let value = decoded.map_err(|e| self.syntax_error(&e.to_string()))?;
        self.index += 1;
        Ok(value)
    }

    fn advance(&mut self) -> Result<Option<T>> {
        loop {
            match self.state {
                State::Done => return Ok(None),
                State::Start => {
                    if self.expect_byte()? != b'[' {
                        return Err(self.syntax_error("expected a top-level JSON array"));
                    }
                    self.reader.consume(1);
                    self.state = State::First;
                }
                State::First => {
                    if self.expect_byte()? == b']' {
                        self.reader.consume(1);
                        self.state = State::Done;
                        continue;
                    }
                    let value = self.read_element()?;
                    self.state = State::Rest;
                    return Ok(Some(value));
                }
                State::Rest => match self.expect_byte()? {
                    b',' => {
                        self.reader.consume(1);
                        let value = self.read_element()?;
                        return Ok(Some(value));
                    }
                    b']' => {
                        self.reader.consume(1);
                        self.state = State::Done;
                    }
                    other => {
                        return Err(self.syntax_error(&format!(
                            "expected ',' or ']', found {:?}",
                            other as char
                        )));
                    }
                },
            }
        }
    }
}

impl<R: BufRead, T: DeserializeOwned> Iterator for JsonArrayReader<R, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(e) => {
                // A broken stream cannot be resynchronized.
                self.state = State::Done;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufReader, Cursor};

    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        #[serde(default)]
        name: Option<String>,
    }

    fn read_all(input: &str) -> Vec<Result<Item>> {
        JsonArrayReader::<_, Item>::new(Cursor::new(input.as_bytes().to_vec()), "test.json")
            .collect()
    }

    #[test]
    fn reads_elements_in_order() {
        let items = read_all(r#"[ {"id": 1, "name": "a"}, {"id": 2} ,{"id":3}]"#);
        let ids: Vec<u32> = items.into_iter().map(|r| r.unwrap().id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn empty_array() {
        assert!(read_all("  [ ]  ").is_empty());
        assert!(read_all("[]").is_empty());
    }

    #[test]
    fn pretty_printed_with_nested_values() {
        let input = r#"[
  {
    "id": 7,
    "name": "braces } and ] inside strings",
    "extra": {"nested": [1, 2, {"deep": true}]}
  },
  {
    "id": 8
  }
]
"#;
        let items: Vec<Item> = read_all(input).into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(
            items[0].name.as_deref(),
            Some("braces } and ] inside strings")
        );
        assert_eq!(items[1].id, 8);
    }

    #[test]
    fn tiny_buffer_still_works() {
        let input = r#"[{"id": 1},   {"id": 2}]"#;
        let reader = BufReader::with_capacity(2, Cursor::new(input.as_bytes().to_vec()));
        let ids: Vec<u32> = JsonArrayReader::<_, Item>::new(reader, "test.json")
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn not_an_array_is_a_parse_error() {
        let items = read_all(r#"{"id": 1}"#);
        assert_eq!(items.len(), 1);
        let err = items.into_iter().next().unwrap().unwrap_err();
        assert!(matches!(err, PaperLinkError::Parse { .. }));
    }

    #[test]
    fn malformed_element_names_index_and_stops() {
        let items = read_all(r#"[{"id": 1}, {"id": "oops"}, {"id": 3}]"#);
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        let msg = items[1].as_ref().unwrap_err().to_string();
        assert!(msg.contains("test.json"));
        assert!(msg.contains("record 1"));
    }

    #[test]
    fn truncated_input_is_an_error() {
        let items = read_all(r#"[{"id": 1}, "#);
        assert!(items.last().unwrap().is_err());

        let items = read_all(r#"[{"id": 1}"#);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[test]
    fn position_counts_decoded_elements() {
        let mut reader = JsonArrayReader::<_, Item>::new(
            Cursor::new(br#"[{"id": 1}, {"id": 2}]"#.to_vec()),
            "test.json",
        );
        assert_eq!(reader.position(), 0);
        reader.next();
        assert_eq!(reader.position(), 1);
    }
}
