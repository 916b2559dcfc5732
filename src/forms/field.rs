//! Form controls and their uniform read/write view.
//!
//! Every control kind reads as a [`Field`] (`value`, `tag`, `kind`,
//! `value_options`) and accepts a [`FieldInput`] on write.

use serde::Serialize;

use super::FormError;
use crate::http::FileUpload;

/// A selectable option of a select, radio group or checkbox group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Choice {
    pub value: String,
    pub selected: bool,
    pub disabled: bool,
}

impl Choice {
    pub fn new(value: impl Into<String>, selected: bool) -> Self {
        Self {
            value: value.into(),
            selected,
            disabled: false,
        }
    }
}

/// Control representation, one per field name (radios and same-named
/// checkboxes are grouped).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Text-like input or textarea. `kind` is the input type
    /// (`text`, `hidden`, `submit`, ...) or `textarea`.
    Input { kind: String, value: String },
    /// A lone checkbox.
    Checkbox { value: String, checked: bool },
    /// Several checkboxes sharing a name.
    CheckboxGroup { options: Vec<Choice> },
    RadioGroup { options: Vec<Choice> },
    Select { multiple: bool, options: Vec<Choice> },
    File,
}

/// Read side of a field value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    #[default]
    None,
    Single(String),
    Multiple(Vec<String>),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Single(value) => Some(value),
            _ => None,
        }
    }

    /// All values as a list: empty, one, or many.
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            FieldValue::None => Vec::new(),
            FieldValue::Single(value) => vec![value.clone()],
            FieldValue::Multiple(values) => values.clone(),
        }
    }
}

/// Uniform read view of one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub value: FieldValue,
    pub tag: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub value_options: Option<Vec<String>>,
}

/// A value assigned to a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldInput {
    Text(String),
    List(Vec<String>),
    File(FileUpload),
}

impl From<&str> for FieldInput {
    fn from(value: &str) -> Self {
        FieldInput::Text(value.to_string())
    }
}

impl From<String> for FieldInput {
    fn from(value: String) -> Self {
        FieldInput::Text(value)
    }
}

impl From<Vec<String>> for FieldInput {
    fn from(values: Vec<String>) -> Self {
        FieldInput::List(values)
    }
}

impl From<Vec<&str>> for FieldInput {
    fn from(values: Vec<&str>) -> Self {
        FieldInput::List(values.into_iter().map(String::from).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldInput {
    fn from(values: [&str; N]) -> Self {
        FieldInput::List(values.into_iter().map(String::from).collect())
    }
}

impl From<FileUpload> for FieldInput {
    fn from(upload: FileUpload) -> Self {
        FieldInput::File(upload)
    }
}

/// A named control as found in the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormControl {
    pub name: String,
    pub disabled: bool,
    pub control: Control,
}

fn option_values(options: &[Choice]) -> Vec<String> {
    options.iter().map(|o| o.value.clone()).collect()
}

fn selected_values(options: &[Choice]) -> Vec<String> {
    options
        .iter()
        .filter(|o| o.selected)
        .map(|o| o.value.clone())
        .collect()
}

impl FormControl {
    /// The uniform view of this control. `pending_file` is the upload
    /// queued for it, if any.
    pub fn view(&self, pending_file: Option<&FileUpload>) -> Field {
        let (value, tag, kind, value_options) = match &self.control {
            Control::Input { kind, value } => {
                let tag = if kind == "textarea" { "textarea" } else { "input" };
                (FieldValue::Single(value.clone()), tag, kind.clone(), None)
            }
            Control::Checkbox { value, checked } => {
                let current = if *checked {
                    FieldValue::Single(value.clone())
                } else {
                    FieldValue::None
                };
                (current, "input", "checkbox".to_string(), Some(vec![value.clone()]))
            }
            Control::CheckboxGroup { options } => (
                FieldValue::Multiple(selected_values(options)),
                "input",
                "checkbox".to_string(),
                Some(option_values(options)),
            ),
            Control::RadioGroup { options } => (
                selected_values(options)
                    .into_iter()
                    .next()
                    .map(FieldValue::Single)
                    .unwrap_or_default(),
                "input",
                "radio".to_string(),
                Some(option_values(options)),
            ),
            Control::Select { multiple: true, options } => (
                FieldValue::Multiple(selected_values(options)),
                "select",
                "select-multiple".to_string(),
                Some(option_values(options)),
            ),
            Control::Select { multiple: false, options } => (
                single_select_value(options)
                    .map(FieldValue::Single)
                    .unwrap_or_default(),
                "select",
                "select-one".to_string(),
                Some(option_values(options)),
            ),
            Control::File => (
                pending_file
                    .map(|f| FieldValue::Single(f.file_name.clone()))
                    .unwrap_or_default(),
                "input",
                "file".to_string(),
                None,
            ),
        };

        Field {
            value,
            tag: tag.to_string(),
            kind,
            value_options,
        }
    }

    /// Assign a text or list value. File inputs are handled by the form.
    pub fn assign(&mut self, input: &FieldInput) -> Result<(), FormError> {
        let name = self.name.clone();
        let invalid = |value: &str, reason: &str| FormError::InvalidValue {
            field: name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let values: Vec<String> = match input {
            FieldInput::Text(value) => vec![value.clone()],
            FieldInput::List(values) => values.clone(),
            FieldInput::File(upload) => {
                return Err(invalid(&upload.file_name, "not a file input"));
            }
        };

        match &mut self.control {
            Control::Input { value, .. } => match values.as_slice() {
                [single] => *value = single.clone(),
                _ => return Err(invalid(&values.join(","), "expects a single value")),
            },
            Control::Checkbox { value, checked } => {
                let wanted: Vec<&String> = values.iter().filter(|v| !v.is_empty()).collect();
                match wanted.as_slice() {
                    [] => *checked = false,
                    [v] if v.as_str() == value.as_str() => *checked = true,
                    _ => return Err(invalid(&values.join(","), "not a value of this checkbox")),
                }
            }
            Control::CheckboxGroup { options } => {
                select_exactly(options, &values).map_err(|v| invalid(&v, "not an option"))?;
            }
            Control::RadioGroup { options } | Control::Select { multiple: false, options } => {
                let wanted: Vec<String> = values.into_iter().filter(|v| !v.is_empty()).collect();
                if wanted.len() > 1 {
                    return Err(invalid(&wanted.join(","), "expects a single value"));
                }
                select_exactly(options, &wanted).map_err(|v| invalid(&v, "not an option"))?;
            }
            Control::Select { multiple: true, options } => {
                select_exactly(options, &values).map_err(|v| invalid(&v, "not an option"))?;
            }
            Control::File => {
                return Err(invalid(&values.join(","), "file inputs take a file upload"));
            }
        }

        Ok(())
    }

    /// Name/value pairs this control contributes to a submission.
    pub fn submission_values(&self) -> Vec<(String, String)> {
        if self.disabled {
            return Vec::new();
        }
        let pair = |value: &str| (self.name.clone(), value.to_string());

        match &self.control {
            Control::Input { kind, value } => match kind.as_str() {
                "submit" | "image" | "reset" | "button" => Vec::new(),
                _ => vec![pair(value)],
            },
            Control::Checkbox { value, checked: true } => vec![pair(value)],
            Control::Checkbox { .. } | Control::File => Vec::new(),
            Control::CheckboxGroup { options }
            | Control::RadioGroup { options }
            | Control::Select { multiple: true, options } => options
                .iter()
                .filter(|o| o.selected && !o.disabled)
                .map(|o| pair(&o.value))
                .collect(),
            Control::Select { multiple: false, options } => single_select_value(options)
                .map(|v| vec![pair(&v)])
                .unwrap_or_default(),
        }
    }
}

/// A single select shows its selected option, else its first one.
fn single_select_value(options: &[Choice]) -> Option<String> {
    options
        .iter()
        .find(|o| o.selected)
        .or_else(|| options.first())
        .map(|o| o.value.clone())
}

/// Select exactly `values`; on an unknown value return it and leave
/// `options` unchanged.
fn select_exactly(options: &mut [Choice], values: &[String]) -> Result<(), String> {
    if let Some(unknown) = values
        .iter()
        .find(|v| !v.is_empty() && !options.iter().any(|o| &o.value == *v))
    {
        return Err(unknown.clone());
    }
    for option in options.iter_mut() {
        option.selected = values.contains(&option.value);
    }
    Ok(())
}
