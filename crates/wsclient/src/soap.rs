//! SOAP envelope encoding and decoding

use crate::error::{ResultError, Result, WsclientError};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde_json::Value;
use std::io::Cursor;

const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const SERVICE_NS: &str = "http://schema.webpdf.de/1.0/soap/";

/// Optional siblings of the operation element
#[derive(Default)]
pub(crate) struct EnvelopeExtras<'a> {
    pub password: Option<&'a Value>,
    pub billing: Option<&'a Value>,
    pub settings: Option<&'a Value>,
}

/// Build the request envelope for one `execute` call
pub(crate) fn build_envelope(
    service_key: &str,
    operation: &Value,
    extras: &EnvelopeExtras<'_>,
    content: Option<&[u8]>,
) -> Result<String> {
    let mut writer = Writer::new(Cursor::new(Vec::new()));
    let namespace = format!("{}{}", SERVICE_NS, service_key);

    write(&mut writer, Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut envelope = BytesStart::new("soapenv:Envelope");
    envelope.push_attribute(("xmlns:soapenv", ENVELOPE_NS));
    envelope.push_attribute(("xmlns:web", namespace.as_str()));
    write(&mut writer, Event::Start(envelope))?;
    write(&mut writer, Event::Empty(BytesStart::new("soapenv:Header")))?;
    write(&mut writer, Event::Start(BytesStart::new("soapenv:Body")))?;
    write(&mut writer, Event::Start(BytesStart::new("web:execute")))?;

    write_value(&mut writer, "operation", operation)?;
    for (name, value) in [
        ("password", extras.password),
        ("billing", extras.billing),
        ("settings", extras.settings),
    ] {
        if let Some(value) = value {
            write_value(&mut writer, name, value)?;
        }
    }
    if let Some(content) = content {
        write_text(&mut writer, "fileContent", &STANDARD.encode(content))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("web:execute")))?;
    write(&mut writer, Event::End(BytesEnd::new("soapenv:Body")))?;
    write(&mut writer, Event::End(BytesEnd::new("soapenv:Envelope")))?;

    String::from_utf8(writer.into_inner().into_inner()).map_err(ResultError::conversion)
}

fn write(writer: &mut Writer<Cursor<Vec<u8>>>, event: Event<'_>) -> Result<()> {
    writer
        .write_event(event)
        .map_err(|e| ResultError::conversion(e.to_string()))
}

fn write_text(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, text: &str) -> Result<()> {
    write(writer, Event::Start(BytesStart::new(name)))?;
    write(writer, Event::Text(BytesText::new(text)))?;
    write(writer, Event::End(BytesEnd::new(name)))
}

/// JSON to XML: objects become child elements, arrays repeat their element
fn write_value(writer: &mut Writer<Cursor<Vec<u8>>>, name: &str, value: &Value) -> Result<()> {
    match value {
        Value::Null => Ok(()),
        Value::Object(map) => {
            write(writer, Event::Start(BytesStart::new(name)))?;
            for (key, child) in map {
                write_value(writer, key, child)?;
            }
            write(writer, Event::End(BytesEnd::new(name)))
        }
        Value::Array(items) => {
            for item in items {
                write_value(writer, name, item)?;
            }
            Ok(())
        }
        Value::String(s) => write_text(writer, name, s),
        Value::Bool(_) | Value::Number(_) => write_text(writer, name, &value.to_string()),
    }
}

/// Result payload of an `execute` response
pub(crate) fn parse_response(body: &[u8]) -> Result<Bytes> {
    let text = std::str::from_utf8(body).map_err(ResultError::invalid_content)?;
    if let Some(fault) = parse_fault(text) {
        return Err(fault);
    }

    let content = element_text(text, &["fileContent", "return"])?.ok_or_else(|| {
        ResultError::client(WsclientError::InvalidResultDocument)
            .with_detail("SOAP response carries no result content")
    })?;
    let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map(Bytes::from)
        .map_err(ResultError::invalid_content)
}

/// Translate a SOAP fault, if the body carries one
pub(crate) fn parse_fault(text: &str) -> Option<ResultError> {
    if !text.contains("Fault") {
        return None;
    }
    let fault_string = element_text(text, &["faultstring"]).ok().flatten()?;
    let code = element_text(text, &["errorCode"])
        .ok()
        .flatten()
        .and_then(|c| c.trim().parse::<i32>().ok())
        .unwrap_or(WsclientError::RestExecution.code());
    let stack_trace = element_text(text, &["stackTrace"]).ok().flatten();
    Some(ResultError::server(code, fault_string.trim(), stack_trace))
}

/// Text of the first element whose local name is one of `names`
fn element_text(xml: &str, names: &[&str]) -> Result<Option<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut capturing = false;
    let mut text = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let local = e.local_name();
                if !capturing && names.iter().any(|n| n.as_bytes() == local.as_ref()) {
                    capturing = true;
                }
            }
            Ok(Event::Text(e)) if capturing => {
                let unescaped = e.unescape().map_err(|e| ResultError::invalid_content(e.to_string()))?;
                text.push_str(&unescaped);
            }
            Ok(Event::End(_)) if capturing => return Ok(Some(text)),
            Ok(Event::Eof) => return Ok(None),
            Ok(_) => {}
            Err(e) => return Err(ResultError::invalid_content(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_contains_parameters_and_content() {
        let operation = json!({
            "pages": "1-5",
            "pdfa": {"convert": {"level": "3b"}},
            "embedFonts": true
        });
        let password = json!({"open": "secret"});
        let extras = EnvelopeExtras {
            password: Some(&password),
            ..Default::default()
        };

        let envelope = build_envelope("converter", &operation, &extras, Some(b"hello")).unwrap();

        assert!(envelope.contains("xmlns:web=\"http://schema.webpdf.de/1.0/soap/converter\""));
        assert!(envelope.contains("<web:execute><operation>"));
        assert!(envelope.contains("<pages>1-5</pages>"));
        assert!(envelope.contains("<pdfa><convert><level>3b</level></convert></pdfa>"));
        assert!(envelope.contains("<embedFonts>true</embedFonts>"));
        assert!(envelope.contains("<password><open>secret</open></password>"));
        assert!(envelope.contains("<fileContent>aGVsbG8=</fileContent>"));
    }

    #[test]
    fn test_arrays_repeat_elements() {
        let operation = json!({"merge": [{"page": 1}, {"page": 2}]});
        let envelope = build_envelope("toolbox", &operation, &EnvelopeExtras::default(), None).unwrap();

        assert!(envelope.contains("<merge><page>1</page></merge><merge><page>2</page></merge>"));
        assert!(!envelope.contains("fileContent"));
    }

    #[test]
    fn test_text_is_escaped() {
        let operation = json!({"headline": "a < b & c"});
        let envelope = build_envelope("converter", &operation, &EnvelopeExtras::default(), None).unwrap();
        assert!(envelope.contains("a &lt; b &amp; c"));
    }

    #[test]
    fn test_parse_response() {
        let body = br#"<?xml version="1.0"?>
            <soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
              <soap:Body>
                <ns2:executeResponse xmlns:ns2="http://schema.webpdf.de/1.0/soap/converter">
                  <return>JVBERi0xLjc=</return>
                </ns2:executeResponse>
              </soap:Body>
            </soap:Envelope>"#;

        let content = parse_response(body).unwrap();
        assert_eq!(&content[..], b"%PDF-1.7");
    }

    #[test]
    fn test_parse_fault() {
        let body = br#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
              <soap:Body>
                <soap:Fault>
                  <faultcode>soap:Server</faultcode>
                  <faultstring>Invalid page range</faultstring>
                  <detail><webserviceException><errorCode>-5008</errorCode></webserviceException></detail>
                </soap:Fault>
              </soap:Body>
            </soap:Envelope>"#;

        let err = parse_response(body).unwrap_err();
        assert!(err.is_server());
        assert_eq!(err.error_code(), -5008);
        assert_eq!(err.message(), "Invalid page range");
    }

    #[test]
    fn test_response_without_content() {
        let body = br#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body/></soap:Envelope>"#;
        let err = parse_response(body).unwrap_err();
        assert_eq!(err.client_error(), WsclientError::InvalidResultDocument);
    }
}
