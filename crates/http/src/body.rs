use serde_json::Value;

/// Request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// Serialized as JSON
    Json(Value),
    /// `multipart/form-data`; the transport picks the boundary
    Multipart(MultipartForm),
}
impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}
impl From<MultipartForm> for Body {
    fn from(form: MultipartForm) -> Self {
        Self::Multipart(form)
    }
}

/// Transport-independent multipart form.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartForm {
    parts: Vec<Part>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub value: PartValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartValue {
    Text(String),
    File { file_name: String, mime: Option<String>, bytes: Vec<u8> },
}

impl MultipartForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push(Part { name: name.into(), value: PartValue::Text(value.into()) });
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        mime: Option<&str>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        let value = PartValue::File { file_name: file_name.into(), mime: mime.map(str::to_string), bytes: bytes.into() };
        self.parts.push(Part { name: name.into(), value });
        self
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Text value of the first part called `name`.
    pub fn text_value(&self, name: &str) -> Option<&str> {
        self.parts.iter().find(|part| part.name == name).and_then(|part| match &part.value {
            PartValue::Text(text) => Some(text.as_str()),
            PartValue::File { .. } => None,
        })
    }
}
