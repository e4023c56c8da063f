//! Minimal XML-RPC codec for rTorrent.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use quick_xml::escape::escape;
use quick_xml::events::Event;
use quick_xml::Reader;

use super::DownloaderError;

/// An XML-RPC value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Double(f64),
    String(String),
    Base64(Vec<u8>),
    Array(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Nil,
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(*b as i64),
            Value::Double(d) => Some(*d as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn member(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(members) => members.iter().find(|(k, _)| k == name).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Serialize a `methodCall` document.
pub fn encode_call(method: &str, params: &[Value]) -> String {
    let mut xml = String::from("<?xml version=\"1.0\"?><methodCall><methodName>");
    xml.push_str(&escape(method));
    xml.push_str("</methodName><params>");
    for param in params {
        xml.push_str("<param>");
        encode_value(param, &mut xml);
        xml.push_str("</param>");
    }
    xml.push_str("</params></methodCall>");
    xml
}

fn encode_value(value: &Value, xml: &mut String) {
    xml.push_str("<value>");
    match value {
        Value::Int(i) => xml.push_str(&format!("<i8>{}</i8>", i)),
        Value::Bool(b) => xml.push_str(&format!("<boolean>{}</boolean>", *b as u8)),
        Value::Double(d) => xml.push_str(&format!("<double>{}</double>", d)),
        Value::String(s) => {
            xml.push_str("<string>");
            xml.push_str(&escape(s.as_str()));
            xml.push_str("</string>");
        }
        Value::Base64(bytes) => {
            xml.push_str("<base64>");
            xml.push_str(&BASE64.encode(bytes));
            xml.push_str("</base64>");
        }
        Value::Array(items) => {
            xml.push_str("<array><data>");
            for item in items {
                encode_value(item, xml);
            }
            xml.push_str("</data></array>");
        }
        Value::Struct(members) => {
            xml.push_str("<struct>");
            for (name, member) in members {
                xml.push_str("<member><name>");
                xml.push_str(&escape(name.as_str()));
                xml.push_str("</name>");
                encode_value(member, xml);
                xml.push_str("</member>");
            }
            xml.push_str("</struct>");
        }
        Value::Nil => xml.push_str("<nil/>"),
    }
    xml.push_str("</value>");
}

#[derive(Debug, PartialEq)]
enum Token {
    Start(String),
    End(String),
    Text(String),
}

fn tokenize(xml: &str) -> Result<Vec<Token>, DownloaderError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);

    let mut tokens = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                tokens.push(Token::Start(String::from_utf8_lossy(e.name().as_ref()).to_string()))
            }
            Ok(Event::Empty(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                tokens.push(Token::Start(name.clone()));
                tokens.push(Token::End(name));
            }
            Ok(Event::End(e)) => {
                tokens.push(Token::End(String::from_utf8_lossy(e.name().as_ref()).to_string()))
            }
            Ok(Event::Text(e)) => {
                let text = e
                    .unescape()
                    .map_err(|err| DownloaderError::ParseError(err.to_string()))?;
                tokens.push(Token::Text(text.to_string()));
            }
            Ok(Event::CData(e)) => {
                tokens.push(Token::Text(String::from_utf8_lossy(&e.into_inner()).to_string()))
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(DownloaderError::ParseError(format!("XML-RPC: {}", e))),
            _ => {}
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn skip_whitespace(&mut self) {
        while let Some(Token::Text(t)) = self.tokens.get(self.pos) {
            if !t.trim().is_empty() {
                break;
            }
            self.pos += 1;
        }
    }

    fn next_start(&mut self) -> Option<String> {
        self.skip_whitespace();
        match self.tokens.get(self.pos) {
            Some(Token::Start(name)) => {
                self.pos += 1;
                Some(name.clone())
            }
            _ => None,
        }
    }

    fn expect_start(&mut self, expected: &str) -> Result<(), DownloaderError> {
        match self.next_start() {
            Some(name) if name == expected => Ok(()),
            other => Err(unexpected(expected, other)),
        }
    }

    fn expect_end(&mut self, expected: &str) -> Result<(), DownloaderError> {
        self.skip_whitespace();
        match self.tokens.get(self.pos) {
            Some(Token::End(name)) if name == expected => {
                self.pos += 1;
                Ok(())
            }
            _ => Err(DownloaderError::ParseError(format!(
                "XML-RPC: expected </{}>",
                expected
            ))),
        }
    }

    fn at_end(&mut self, name: &str) -> bool {
        self.skip_whitespace();
        matches!(self.tokens.get(self.pos), Some(Token::End(n)) if n == name)
    }

    /// Text up to the next closing tag (empty when there is none).
    fn text(&mut self) -> String {
        let mut text = String::new();
        while let Some(Token::Text(t)) = self.tokens.get(self.pos) {
            text.push_str(t);
            self.pos += 1;
        }
        text
    }

    /// Parses `<value>...</value>`; the opening tag is consumed here.
    fn value(&mut self) -> Result<Value, DownloaderError> {
        self.expect_start("value")?;

        // Untyped content is a string.
        if let Some(Token::Text(_)) | Some(Token::End(_)) = self.tokens.get(self.pos) {
            let raw = self.text();
            if self.at_end("value") {
                self.expect_end("value")?;
                return Ok(Value::String(raw));
            }
        }

        let kind = self
            .next_start()
            .ok_or_else(|| DownloaderError::ParseError("XML-RPC: empty value".to_string()))?;
        let value = match kind.as_str() {
            "i4" | "i8" | "int" => {
                let text = self.text();
                Value::Int(text.trim().parse().map_err(|_| invalid(&kind, &text))?)
            }
            "boolean" => Value::Bool(self.text().trim() == "1"),
            "double" => {
                let text = self.text();
                Value::Double(text.trim().parse().map_err(|_| invalid(&kind, &text))?)
            }
            "string" => Value::String(self.text()),
            "base64" => {
                let text = self.text();
                let cleaned: String = text.split_whitespace().collect();
                Value::Base64(BASE64.decode(cleaned).map_err(|_| invalid(&kind, &text))?)
            }
            "nil" => Value::Nil,
            "array" => {
                self.expect_start("data")?;
                let mut items = Vec::new();
                while !self.at_end("data") {
                    items.push(self.value()?);
                }
                self.expect_end("data")?;
                Value::Array(items)
            }
            "struct" => {
                let mut members = Vec::new();
                while !self.at_end("struct") {
                    self.expect_start("member")?;
                    self.expect_start("name")?;
                    let name = self.text();
                    self.expect_end("name")?;
                    members.push((name, self.value()?));
                    self.expect_end("member")?;
                }
                Value::Struct(members)
            }
            other => {
                return Err(DownloaderError::ParseError(format!(
                    "XML-RPC: unknown type <{}>",
                    other
                )))
            }
        };
        self.expect_end(&kind)?;
        self.expect_end("value")?;
        Ok(value)
    }
}

fn unexpected(expected: &str, found: Option<String>) -> DownloaderError {
    DownloaderError::ParseError(format!(
        "XML-RPC: expected <{}>, found {}",
        expected,
        found.map(|f| format!("<{}>", f)).unwrap_or_else(|| "text".to_string())
    ))
}

fn invalid(kind: &str, text: &str) -> DownloaderError {
    DownloaderError::ParseError(format!("XML-RPC: invalid {} '{}'", kind, text))
}

/// Parse a `methodResponse`. A `<fault>` becomes [`DownloaderError::ApiError`].
pub fn decode_response(xml: &str) -> Result<Value, DownloaderError> {
    let mut tokens = tokenize(xml)?;
    // Drop the prolog-level whitespace quick-xml reports between tags.
    tokens.retain(|t| !matches!(t, Token::Text(s) if s.trim().is_empty()));
    let mut parser = Parser { tokens, pos: 0 };

    parser.expect_start("methodResponse")?;
    match parser.next_start().as_deref() {
        Some("params") => {
            parser.expect_start("param")?;
            let value = parser.value()?;
            Ok(value)
        }
        Some("fault") => {
            let fault = parser.value()?;
            let code = fault.member("faultCode").and_then(Value::as_i64).unwrap_or(0);
            let message = fault
                .member("faultString")
                .and_then(Value::as_str)
                .unwrap_or("unknown fault");
            Err(DownloaderError::ApiError(format!("XML-RPC fault {}: {}", code, message)))
        }
        other => Err(unexpected("params", other.map(str::to_string))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_call() {
        let xml = encode_call(
            "load.raw_start",
            &[
                Value::from(""),
                Value::Base64(b"d4:infoe".to_vec()),
                Value::from("d.directory.set=\"/games & more\""),
            ],
        );
        assert!(xml.contains("<methodName>load.raw_start</methodName>"));
        assert!(xml.contains("<base64>ZDQ6aW5mb2U=</base64>"));
        assert!(xml.contains("/games &amp; more"));
    }

    #[test]
    fn test_decode_multicall_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<methodResponse>
  <params>
    <param>
      <value><array><data>
        <value><array><data>
          <value><string>ABCDEF</string></value>
          <value><i8>1024</i8></value>
          <value>untyped</value>
          <value><string></string></value>
        </data></array></value>
      </data></array></value>
    </param>
  </params>
</methodResponse>"#;
        let value = decode_response(xml).unwrap();
        let rows = value.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        let row = rows[0].as_array().unwrap();
        assert_eq!(row[0].as_str(), Some("ABCDEF"));
        assert_eq!(row[1].as_i64(), Some(1024));
        assert_eq!(row[2].as_str(), Some("untyped"));
        assert_eq!(row[3].as_str(), Some(""));
    }

    #[test]
    fn test_decode_fault() {
        let xml = r#"<?xml version="1.0"?>
<methodResponse><fault><value><struct>
  <member><name>faultCode</name><value><i4>-501</i4></value></member>
  <member><name>faultString</name><value><string>Could not find info-hash.</string></value></member>
</struct></value></fault></methodResponse>"#;
        let err = decode_response(xml).unwrap_err();
        assert!(err.to_string().contains("Could not find info-hash."));
        assert!(err.to_string().contains("-501"));
    }

    #[test]
    fn test_decode_malformed() {
        assert!(decode_response("<methodResponse><params>").is_err());
        assert!(decode_response("<html>nope</html>").is_err());
    }
}
