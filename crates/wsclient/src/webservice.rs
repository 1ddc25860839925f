//! Web service invocation
//!
//! A [`WebServiceInvoker`] executes one server-side operation: it holds the
//! operation's parameter tree, validates it against a [`ParameterSchema`] and
//! turns the server's answer into an [`OperationResult`].

use crate::config::TransportVariant;
use crate::error::{ResultError, Result, WsclientError};
use crate::http::{is_json_response, read_body, read_bytes, ApiRequest};
use crate::session::Session;
use crate::soap::{self, EnvelopeExtras};
use crate::types::{DocumentFile, OperationResult, RemoteDocument};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, instrument};

/// Server-side transformation services
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WebServiceType {
    Converter,
    Toolbox,
    Pdfa,
    Ocr,
    Signature,
    UrlConverter,
    Barcode,
}

impl WebServiceType {
    pub const ALL: [WebServiceType; 7] = [
        Self::Converter,
        Self::Toolbox,
        Self::Pdfa,
        Self::Ocr,
        Self::Signature,
        Self::UrlConverter,
        Self::Barcode,
    ];

    /// Key of the parameter object in the operation envelope
    pub fn key(&self) -> &'static str {
        match self {
            Self::Converter => "converter",
            Self::Toolbox => "toolbox",
            Self::Pdfa => "pdfa",
            Self::Ocr => "ocr",
            Self::Signature => "signature",
            Self::UrlConverter => "urlconverter",
            Self::Barcode => "barcode",
        }
    }

    /// Whether the service operates on an uploaded document
    pub fn requires_input(&self) -> bool {
        !matches!(self, Self::UrlConverter)
    }

    fn rest_path(&self, document_id: Option<&str>) -> String {
        match document_id {
            Some(id) => format!("{}/{}", self.key(), id),
            None => self.key().to_string(),
        }
    }

    /// Default, empty parameter tree
    pub fn default_parameters(&self) -> ParameterTree {
        match self {
            Self::Toolbox => ParameterTree::array(),
            _ => ParameterTree::object(),
        }
    }

    /// Built-in parameter constraints
    pub fn schema(&self) -> ParameterSchema {
        match self {
            Self::Toolbox => ParameterSchema::array(),
            Self::Pdfa => ParameterSchema::object()
                .one_of("convert.level", ["1a", "1b", "2a", "2b", "2u", "3a", "3b", "3u"]),
            Self::Ocr => ParameterSchema::object().one_of("outputFormat", ["pdf", "hocr", "text"]),
            Self::UrlConverter => ParameterSchema::object().require("url"),
            Self::Converter | Self::Signature | Self::Barcode => ParameterSchema::object(),
        }
    }
}

impl fmt::Display for WebServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for WebServiceType {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.key() == name)
            .ok_or_else(|| ResultError::client(WsclientError::UnknownWebserviceType).with_detail(s))
    }
}

/// Nested operation parameters, addressed with dotted paths
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterTree(Value);

impl ParameterTree {
    /// Empty object tree
    pub fn object() -> Self {
        Self(Value::Object(Map::new()))
    }

    /// Empty array tree
    pub fn array() -> Self {
        Self(Value::Array(Vec::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parse a tree from JSON text
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map(Self)
            .map_err(ResultError::conversion)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn as_value_mut(&mut self) -> &mut Value {
        &mut self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up a dotted path; numeric segments index into arrays
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(&self.0, |node, segment| match node {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    /// Set a dotted path, creating intermediate objects
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(ResultError::invalid_parameters(format!("invalid path '{}'", path)));
        }

        let mut node = &mut self.0;
        for segment in &segments[..segments.len() - 1] {
            node = match node {
                Value::Object(map) => map
                    .entry(segment.to_string())
                    .or_insert_with(|| Value::Object(Map::new())),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| items.get_mut(i))
                    .ok_or_else(|| {
                        ResultError::invalid_parameters(format!("no element '{}' in '{}'", segment, path))
                    })?,
                _ => {
                    return Err(ResultError::invalid_parameters(format!(
                        "'{}' crosses a scalar value",
                        path
                    )))
                }
            };
        }

        let last = segments[segments.len() - 1];
        match node {
            Value::Object(map) => {
                map.insert(last.to_string(), value.into());
                Ok(())
            }
            Value::Array(items) => match last.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
                Some(slot) => {
                    *slot = value.into();
                    Ok(())
                }
                None => Err(ResultError::invalid_parameters(format!(
                    "no element '{}' in '{}'",
                    last, path
                ))),
            },
            _ => Err(ResultError::invalid_parameters(format!(
                "'{}' crosses a scalar value",
                path
            ))),
        }
    }

    /// Append an operation to an array tree
    pub fn push(&mut self, value: impl Into<Value>) -> Result<()> {
        match &mut self.0 {
            Value::Array(items) => {
                items.push(value.into());
                Ok(())
            }
            _ => Err(ResultError::invalid_parameters("parameter tree is not a list")),
        }
    }
}

impl Default for ParameterTree {
    fn default() -> Self {
        Self::object()
    }
}

impl From<Value> for ParameterTree {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RootKind {
    Object,
    Array,
}

/// Statically checkable constraints of a parameter tree
#[derive(Clone, Debug)]
pub struct ParameterSchema {
    root: RootKind,
    required: Vec<String>,
    enums: Vec<(String, Vec<String>)>,
}

impl ParameterSchema {
    /// Schema for trees rooted in an object
    pub fn object() -> Self {
        Self {
            root: RootKind::Object,
            required: Vec::new(),
            enums: Vec::new(),
        }
    }

    /// Schema for trees rooted in an array
    pub fn array() -> Self {
        Self {
            root: RootKind::Array,
            ..Self::object()
        }
    }

    /// Require a dotted path to be present and non-null
    pub fn require(mut self, path: impl Into<String>) -> Self {
        self.required.push(path.into());
        self
    }

    /// Restrict a dotted path to a set of values, when present
    pub fn one_of<I, S>(mut self, path: impl Into<String>, allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums
            .push((path.into(), allowed.into_iter().map(Into::into).collect()));
        self
    }

    fn merge(mut self, other: ParameterSchema) -> Self {
        self.required.extend(other.required);
        self.enums.extend(other.enums);
        self
    }

    /// Check a tree against the schema
    pub fn validate(&self, tree: &ParameterTree) -> Result<()> {
        let root_ok = match self.root {
            RootKind::Object => tree.as_value().is_object(),
            RootKind::Array => tree.as_value().is_array(),
        };
        if !root_ok {
            let expected = match self.root {
                RootKind::Object => "an object",
                RootKind::Array => "a list",
            };
            return Err(ResultError::invalid_parameters(format!(
                "parameter tree must be {}",
                expected
            )));
        }

        for path in &self.required {
            if tree.get(path).map_or(true, Value::is_null) {
                return Err(ResultError::invalid_parameters(format!(
                    "required parameter '{}' is not set",
                    path
                )));
            }
        }

        for (path, allowed) in &self.enums {
            let Some(value) = tree.get(path).filter(|v| !v.is_null()) else {
                continue;
            };
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if !allowed.iter().any(|a| *a == text) {
                return Err(ResultError::invalid_parameters(format!(
                    "'{}' must be one of [{}], got '{}'",
                    path,
                    allowed.join(", "),
                    text
                )));
            }
        }
        Ok(())
    }
}

/// Executes one web service operation on behalf of a session
#[derive(Clone)]
pub struct WebServiceInvoker {
    session: Session,
    service: WebServiceType,
    parameters: ParameterTree,
    password: Option<Value>,
    billing: Option<Value>,
    settings: Option<Value>,
    schema: ParameterSchema,
    additional: Vec<(String, String)>,
}

impl WebServiceInvoker {
    pub(crate) fn new(session: Session, service: WebServiceType) -> Self {
        Self {
            session,
            service,
            parameters: service.default_parameters(),
            password: None,
            billing: None,
            settings: None,
            schema: service.schema(),
            additional: Vec::new(),
        }
    }

    /// Create an invoker from a complete operation envelope.
    ///
    /// The service is detected from the envelope key present, e.g.
    /// `{"converter": {...}, "password": {...}}`.
    pub fn from_operation_json(session: &Session, json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json).map_err(ResultError::conversion)?;
        let Value::Object(mut envelope) = value else {
            return Err(ResultError::invalid_parameters("operation must be a JSON object"));
        };

        let service = WebServiceType::ALL
            .iter()
            .copied()
            .find(|t| envelope.contains_key(t.key()))
            .ok_or_else(|| {
                ResultError::client(WsclientError::UnknownWebserviceType)
                    .with_detail("no known service key in operation")
            })?;

        let mut invoker = session.create_web_service_instance(service)?;
        if let Some(parameters) = envelope.remove(service.key()) {
            invoker.set_operation_parameters(ParameterTree(parameters))?;
        }
        invoker.password = envelope.remove("password").filter(|v| !v.is_null());
        invoker.billing = envelope.remove("billing").filter(|v| !v.is_null());
        invoker.settings = envelope.remove("settings").filter(|v| !v.is_null());
        Ok(invoker)
    }

    pub fn service(&self) -> WebServiceType {
        self.service
    }

    /// Current parameter tree
    pub fn operation_parameters(&self) -> &ParameterTree {
        &self.parameters
    }

    /// Mutable access to the parameter tree; validated on `process`
    pub fn operation_parameters_mut(&mut self) -> &mut ParameterTree {
        &mut self.parameters
    }

    /// Replace the whole parameter tree after validating it
    pub fn set_operation_parameters(&mut self, parameters: ParameterTree) -> Result<()> {
        self.schema.validate(&parameters)?;
        self.parameters = parameters;
        Ok(())
    }

    /// Add constraints on top of the built-in ones
    pub fn with_schema(mut self, schema: ParameterSchema) -> Self {
        self.schema = self.schema.merge(schema);
        self
    }

    pub fn set_password(&mut self, password: Value) {
        self.password = Some(password);
    }

    pub fn set_billing(&mut self, billing: Value) {
        self.billing = Some(billing);
    }

    pub fn set_settings(&mut self, settings: Value) {
        self.settings = Some(settings);
    }

    /// Extra query parameter for the call
    pub fn add_parameter(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.additional.push((key.into(), value.into()));
    }

    /// The JSON envelope sent to REST endpoints
    pub fn envelope(&self) -> Value {
        let mut envelope = Map::new();
        envelope.insert(self.service.key().to_string(), self.parameters.0.clone());
        for (key, value) in [
            ("password", &self.password),
            ("billing", &self.billing),
            ("settings", &self.settings),
        ] {
            if let Some(value) = value {
                envelope.insert(key.to_string(), value.clone());
            }
        }
        Value::Object(envelope)
    }

    /// Execute the operation on a tracked document
    #[instrument(skip(self, input), fields(service = %self.service))]
    pub async fn process(&self, input: Option<&RemoteDocument>) -> Result<OperationResult> {
        let conn = self.session.connection();
        conn.ensure_active()?;
        self.schema.validate(&self.parameters)?;

        match (self.service.requires_input(), input) {
            (true, None) => {
                return Err(ResultError::invalid_parameters(format!(
                    "{} requires an input document",
                    self.service
                )))
            }
            (false, Some(_)) => {
                return Err(ResultError::invalid_parameters(format!(
                    "{} does not take an input document",
                    self.service
                )))
            }
            _ => {}
        }

        match conn.transport() {
            TransportVariant::Rest => self.process_rest(input).await,
            TransportVariant::Soap => match input {
                Some(_) => Err(ResultError::client(WsclientError::UnknownSessionType)
                    .with_detail("SOAP sessions have no document store, use process_content")),
                None => self.process_soap(None).await.map(OperationResult::Bytes),
            },
        }
    }

    /// Execute the operation on inline content.
    ///
    /// REST sessions upload the content first and return the result
    /// document; SOAP sessions send it inside the envelope and return bytes.
    #[instrument(skip(self, data), fields(service = %self.service, size = data.len()))]
    pub async fn process_content(&self, data: Bytes, file_name: &str) -> Result<OperationResult> {
        let conn = self.session.connection();
        conn.ensure_active()?;
        self.schema.validate(&self.parameters)?;
        if !self.service.requires_input() {
            return Err(ResultError::invalid_parameters(format!(
                "{} does not take an input document",
                self.service
            )));
        }

        match conn.transport() {
            TransportVariant::Rest => {
                let document = self.session.upload_document(data, file_name).await?;
                self.process_rest(Some(&document)).await
            }
            TransportVariant::Soap => self.process_soap(Some(&data[..])).await.map(OperationResult::Bytes),
        }
    }

    async fn process_rest(&self, input: Option<&RemoteDocument>) -> Result<OperationResult> {
        let documents = self.session.document_manager();
        if let Some(document) = input {
            if !documents.contains_document(document.document_id()) {
                return Err(ResultError::not_found(document.document_id()));
            }
        }

        let mut request = ApiRequest::post(self.service.rest_path(input.map(|d| d.document_id())));
        if !self.service.requires_input() {
            request = request.query("history", documents.is_history_active());
        }
        for (key, value) in &self.additional {
            request = request.query(key.as_str(), value);
        }
        let request = request.json(&self.envelope())?;

        let response = self.session.connection().execute(request).await?;
        let json = is_json_response(&response);
        let body = read_bytes(response).await?;
        if json {
            if let Ok(file) = serde_json::from_slice::<DocumentFile>(&body) {
                if !file.document_id.is_empty() {
                    debug!("{} produced document {}", self.service, file.document_id);
                    return documents
                        .synchronize_document(file)
                        .await
                        .map(OperationResult::Document);
                }
            }
        }
        Ok(OperationResult::Bytes(body))
    }

    async fn process_soap(&self, content: Option<&[u8]>) -> Result<Bytes> {
        let extras = EnvelopeExtras {
            password: self.password.as_ref(),
            billing: self.billing.as_ref(),
            settings: self.settings.as_ref(),
        };
        let envelope = soap::build_envelope(self.service.key(), self.parameters.as_value(), &extras, content)?;

        let mut request = ApiRequest::post(self.service.key()).xml(envelope);
        for (key, value) in &self.additional {
            request = request.query(key.as_str(), value);
        }

        let response = self.session.connection().execute_unchecked(request).await?;
        let status = response.status();
        if !status.is_success() {
            let (content_type, body) = read_body(response).await;
            let text = String::from_utf8_lossy(&body);
            return Err(soap::parse_fault(&text).unwrap_or_else(|| {
                ResultError::from_response(status.as_u16(), content_type.as_deref(), &body)
            })
            .with_http_status(status.as_u16()));
        }
        soap::parse_response(&read_bytes(response).await?)
    }
}

impl fmt::Debug for WebServiceInvoker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebServiceInvoker")
            .field("service", &self.service)
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("converter", WebServiceType::Converter)]
    #[case("TOOLBOX", WebServiceType::Toolbox)]
    #[case(" urlconverter ", WebServiceType::UrlConverter)]
    #[case("barcode", WebServiceType::Barcode)]
    fn test_service_from_str(#[case] name: &str, #[case] expected: WebServiceType) {
        assert_eq!(name.parse::<WebServiceType>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_service() {
        let err = "fax".parse::<WebServiceType>().unwrap_err();
        assert_eq!(err.client_error(), WsclientError::UnknownWebserviceType);
    }

    #[test]
    fn test_rest_paths() {
        assert_eq!(WebServiceType::Converter.rest_path(Some("abc")), "converter/abc");
        assert_eq!(WebServiceType::UrlConverter.rest_path(None), "urlconverter");
        assert!(!WebServiceType::UrlConverter.requires_input());
        assert!(WebServiceType::Ocr.requires_input());
    }

    #[test]
    fn test_tree_paths() {
        let mut tree = ParameterTree::object();
        tree.set("pages", "1-5").unwrap();
        tree.set("pdfa.convert.level", "3b").unwrap();

        assert_eq!(tree.get("pages"), Some(&json!("1-5")));
        assert_eq!(tree.get("pdfa.convert.level"), Some(&json!("3b")));
        assert!(tree.get("pdfa.missing").is_none());

        let err = tree.set("pages.first", 1).unwrap_err();
        assert_eq!(err.client_error(), WsclientError::InvalidParameters);
        assert!(tree.set("a..b", 1).is_err());
    }

    #[test]
    fn test_array_tree() {
        let mut tree = WebServiceType::Toolbox.default_parameters();
        tree.push(json!({"rotate": {"degrees": 90}})).unwrap();
        tree.set("0.rotate.degrees", 180).unwrap();

        assert_eq!(tree.get("0.rotate.degrees"), Some(&json!(180)));
        assert!(tree.set("3.rotate", 1).is_err());
        assert!(ParameterTree::object().push(1).is_err());
    }

    #[rstest]
    #[case(WebServiceType::Pdfa, json!({"convert": {"level": "3b"}}), true)]
    #[case(WebServiceType::Pdfa, json!({"convert": {"level": "4z"}}), false)]
    #[case(WebServiceType::Pdfa, json!({}), true)]
    #[case(WebServiceType::Ocr, json!({"outputFormat": "hocr"}), true)]
    #[case(WebServiceType::Ocr, json!({"outputFormat": "docx"}), false)]
    #[case(WebServiceType::UrlConverter, json!({"url": "https://example.com"}), true)]
    #[case(WebServiceType::UrlConverter, json!({"url": null}), false)]
    #[case(WebServiceType::UrlConverter, json!({}), false)]
    #[case(WebServiceType::Toolbox, json!([]), true)]
    #[case(WebServiceType::Toolbox, json!({}), false)]
    #[case(WebServiceType::Converter, json!([]), false)]
    fn test_builtin_schemas(#[case] service: WebServiceType, #[case] tree: Value, #[case] valid: bool) {
        let result = service.schema().validate(&ParameterTree::from_value(tree));
        assert_eq!(result.is_ok(), valid, "{:?}", result);
        if let Err(e) = result {
            assert!(e.is_client());
            assert_eq!(e.client_error(), WsclientError::InvalidParameters);
        }
    }

    #[test]
    fn test_schema_merge() {
        let schema = WebServiceType::Converter
            .schema()
            .merge(ParameterSchema::object().require("pages"));

        assert!(schema.validate(&ParameterTree::object()).is_err());
        let tree = ParameterTree::from_json(r#"{"pages": "1-5"}"#).unwrap();
        assert!(schema.validate(&tree).is_ok());
    }
}
