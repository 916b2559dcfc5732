//! HTML forms as editable, submittable values.
//!
//! [`Form::extract`] turns every `<form>` of a document into a [`Form`]
//! holding its controls. Fields are read through a uniform [`Field`] view
//! and written with [`Form::set_fields`]; file uploads are kept apart from
//! text values and switch the submission to multipart.

mod field;

pub use field::{Choice, Control, Field, FieldInput, FieldValue, FormControl};

use std::collections::BTreeMap;

use reqwest::Method;
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::document::Document;
use crate::filter::Attributes;
use crate::http::{Body, FileUpload, Response};

/// Errors raised when editing a form.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("form has no field named '{0}'")]
    UnknownField(String),

    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Selects forms by `id`, `name`, raw `action` and required field names.
/// Unset criteria always pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormFilter {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub has_fields: Vec<String>,
}

impl FormFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn has_fields<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.has_fields = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn matches(&self, form: &Form) -> bool {
        let exact = |expected: &Option<String>, key: &str| match expected {
            Some(expected) => form.attr(key) == Some(expected.as_str()),
            None => true,
        };
        exact(&self.id, "id")
            && exact(&self.name, "name")
            && exact(&self.action, "action")
            && form.has_fields(&self.has_fields)
    }
}

/// Conditions a submission result must meet. Unset conditions pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitCheck {
    /// Substring of the response body.
    #[serde(default)]
    pub phrase: Option<String>,
    /// Exact final URL.
    #[serde(default)]
    pub url: Option<String>,
    /// Allowed status codes; empty allows any.
    #[serde(default)]
    pub status_codes: Vec<u16>,
}

impl SubmitCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phrase(mut self, phrase: impl Into<String>) -> Self {
        self.phrase = Some(phrase.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    pub fn check(&self, response: &Response) -> bool {
        if let Some(ref phrase) = self.phrase {
            if !response.text().contains(phrase.as_str()) {
                return false;
            }
        }
        if let Some(ref url) = self.url {
            if response.url.as_str() != url.as_str() {
                return false;
            }
        }
        self.status_codes.is_empty() || self.status_codes.contains(&response.status.as_u16())
    }
}

/// One form of a page.
#[derive(Debug, Clone)]
pub struct Form {
    attributes: Attributes,
    base_url: Url,
    controls: Vec<FormControl>,
    files: BTreeMap<String, FileUpload>,
    result: Option<Response>,
}

impl Form {
    /// Every `<form>` of `document`, in document order.
    pub fn extract(document: &Document) -> Vec<Form> {
        let Ok(form_sel) = Selector::parse("form") else {
            return Vec::new();
        };
        let Ok(control_sel) = Selector::parse("input, textarea, select") else {
            return Vec::new();
        };

        let html = document.parse();
        html.select(&form_sel)
            .map(|form| Form::from_element(form, &control_sel, document.url().clone()))
            .collect()
    }

    fn from_element(form: ElementRef<'_>, control_sel: &Selector, base_url: Url) -> Form {
        let attributes: Attributes = form
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut controls: Vec<FormControl> = Vec::new();
        for el in form.select(control_sel) {
            let Some(name) = el.value().attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let disabled = el.value().attr("disabled").is_some();
            let tag = el.value().name();

            match tag {
                "textarea" => controls.push(FormControl {
                    name: name.to_string(),
                    disabled,
                    control: Control::Input {
                        kind: "textarea".to_string(),
                        value: el.text().collect(),
                    },
                }),
                "select" => controls.push(FormControl {
                    name: name.to_string(),
                    disabled,
                    control: Control::Select {
                        multiple: el.value().attr("multiple").is_some(),
                        options: select_options(el),
                    },
                }),
                _ => add_input(&mut controls, el, name, disabled),
            }
        }

        Form {
            attributes,
            base_url,
            controls,
            files: BTreeMap::new(),
            result: None,
        }
    }

    /// Raw form attribute.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(|s| s.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    pub fn name(&self) -> Option<&str> {
        self.attr("name")
    }

    /// Submission method; GET unless the form says otherwise.
    pub fn method(&self) -> Method {
        self.attr("method")
            .map(|m| m.trim().to_ascii_uppercase())
            .filter(|m| !m.is_empty())
            .and_then(|m| Method::from_bytes(m.as_bytes()).ok())
            .unwrap_or(Method::GET)
    }

    /// Action resolved against the page URL. An absolute action is used
    /// as is; a missing or empty one targets the page itself.
    pub fn action_url(&self) -> Result<Url, url::ParseError> {
        let action = self.attr("action").map(str::trim).unwrap_or_default();
        if action.is_empty() {
            return Ok(self.base_url.clone());
        }
        match Url::parse(action) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base_url.join(action),
            Err(e) => Err(e),
        }
    }

    /// URL of the page the form came from.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn controls(&self) -> &[FormControl] {
        &self.controls
    }

    fn control(&self, name: &str) -> Option<&FormControl> {
        self.controls.iter().find(|c| c.name == name)
    }

    /// Field names in form order.
    pub fn field_names(&self) -> Vec<&str> {
        self.controls.iter().map(|c| c.name.as_str()).collect()
    }

    /// View of one field, `None` when the form has no such field.
    pub fn field(&self, name: &str) -> Option<Field> {
        self.control(name)
            .map(|c| c.view(self.files.get(name)))
    }

    /// Views of every field, keyed by name. The first control of a name wins.
    pub fn fields(&self) -> BTreeMap<String, Field> {
        let mut fields = BTreeMap::new();
        for control in &self.controls {
            fields
                .entry(control.name.clone())
                .or_insert_with(|| control.view(self.files.get(&control.name)));
        }
        fields
    }

    /// True when every name in `names` is a field of this form.
    pub fn has_fields<S: AsRef<str>>(&self, names: &[S]) -> bool {
        names.iter().all(|n| self.control(n.as_ref()).is_some())
    }

    /// Assign several fields at once.
    ///
    /// File values are queued as uploads for their field; other values
    /// are applied to the controls. Either every assignment succeeds or
    /// the form is left untouched.
    pub fn set_fields<I, K, V>(&mut self, values: I) -> Result<(), FormError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<FieldInput>,
    {
        let mut controls = self.controls.clone();
        let mut files = self.files.clone();

        for (name, value) in values {
            let name = name.into();
            let value = value.into();
            let control = controls
                .iter_mut()
                .find(|c| c.name == name)
                .ok_or_else(|| FormError::UnknownField(name.clone()))?;

            match value {
                FieldInput::File(upload) => {
                    files.insert(name, upload);
                }
                other => control.assign(&other)?,
            }
        }

        self.controls = controls;
        self.files = files;
        Ok(())
    }

    /// Assign one field.
    pub fn set_field(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FieldInput>,
    ) -> Result<(), FormError> {
        self.set_fields([(name.into(), value.into())])
    }

    /// Uploads queued for submission, keyed by field name.
    pub fn files(&self) -> &BTreeMap<String, FileUpload> {
        &self.files
    }

    /// Successful name/value pairs in form order. Disabled controls,
    /// buttons, file inputs and unchecked boxes contribute nothing.
    pub fn form_values(&self) -> Vec<(String, String)> {
        self.controls
            .iter()
            .flat_map(|c| c.submission_values())
            .collect()
    }

    /// Request body for a submission with `extra` pairs appended.
    ///
    /// Pending files force multipart (see [`Form::submission_method`]);
    /// otherwise POST-like methods send an urlencoded form and GET sends
    /// nothing (values go in the query).
    pub(crate) fn submission_body(
        &self,
        extra: &[(String, String)],
    ) -> (Vec<(String, String)>, Body) {
        let mut values = self.form_values();
        values.extend(extra.iter().cloned());

        if !self.files.is_empty() {
            let files = self
                .files
                .iter()
                .map(|(name, upload)| (name.clone(), upload.clone()))
                .collect();
            return (Vec::new(), Body::Multipart { fields: values, files });
        }

        if self.method() == Method::GET {
            (values, Body::Empty)
        } else {
            (Vec::new(), Body::Form(values))
        }
    }

    /// Method used to submit: the form's own, except that pending file
    /// uploads turn a GET into a POST.
    pub fn submission_method(&self) -> Method {
        let method = self.method();
        if !self.files.is_empty() && method == Method::GET {
            Method::POST
        } else {
            method
        }
    }

    /// Response of the last submission of this form.
    pub fn result(&self) -> Option<&Response> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, response: Response) {
        self.result = Some(response);
    }

    /// Check the last submission result. False if never submitted.
    pub fn check(&self, check: &SubmitCheck) -> bool {
        self.result.as_ref().is_some_and(|r| check.check(r))
    }
}

fn select_options(select: ElementRef<'_>) -> Vec<Choice> {
    let Ok(option_sel) = Selector::parse("option") else {
        return Vec::new();
    };
    select
        .select(&option_sel)
        .map(|option| {
            let value = option
                .value()
                .attr("value")
                .map(String::from)
                .unwrap_or_else(|| option.text().collect::<String>().trim().to_string());
            Choice {
                value,
                selected: option.value().attr("selected").is_some(),
                disabled: option.value().attr("disabled").is_some(),
            }
        })
        .collect()
}

fn add_input(controls: &mut Vec<FormControl>, el: ElementRef<'_>, name: &str, disabled: bool) {
    let kind = el
        .value()
        .attr("type")
        .unwrap_or("text")
        .trim()
        .to_ascii_lowercase();
    let checked = el.value().attr("checked").is_some();

    match kind.as_str() {
        "radio" | "checkbox" => {
            let value = el.value().attr("value").unwrap_or("on").to_string();
            let choice = Choice {
                value: value.clone(),
                selected: checked,
                disabled,
            };
            let existing = controls.iter_mut().find(|c| {
                c.name == name
                    && matches!(
                        (&c.control, kind.as_str()),
                        (Control::RadioGroup { .. }, "radio")
                            | (Control::Checkbox { .. }, "checkbox")
                            | (Control::CheckboxGroup { .. }, "checkbox")
                    )
            });

            match existing {
                Some(control) => match &mut control.control {
                    Control::RadioGroup { options } | Control::CheckboxGroup { options } => {
                        options.push(choice);
                    }
                    Control::Checkbox { value, checked } => {
                        let first = Choice {
                            value: std::mem::take(value),
                            selected: *checked,
                            disabled: control.disabled,
                        };
                        control.control = Control::CheckboxGroup {
                            options: vec![first, choice],
                        };
                        control.disabled = false;
                    }
                    _ => {}
                },
                None if kind == "radio" => controls.push(FormControl {
                    name: name.to_string(),
                    disabled: false,
                    control: Control::RadioGroup {
                        options: vec![choice],
                    },
                }),
                None => controls.push(FormControl {
                    name: name.to_string(),
                    disabled,
                    control: Control::Checkbox { value, checked },
                }),
            }
        }
        "file" => controls.push(FormControl {
            name: name.to_string(),
            disabled,
            control: Control::File,
        }),
        _ => controls.push(FormControl {
            name: name.to_string(),
            disabled,
            control: Control::Input {
                kind: kind.clone(),
                value: el.value().attr("value").unwrap_or_default().to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"<html><body>
      <form id="search" action="/s" method="get">
        <input type="text" name="q" value="kittens">
        <input type="submit" name="go" value="Search">
      </form>
      <form name="order" action="https://pizza.example/order" method="POST" enctype="multipart/form-data">
        <input name="custname">
        <input type="checkbox" name="topping" value="bacon">
        <input type="checkbox" name="topping" value="cheese" checked>
        <input type="checkbox" name="topping" value="onion">
        <input type="checkbox" name="delivery" value="yes">
        <input type="radio" name="size" value="small">
        <input type="radio" name="size" value="medium" checked>
        <input type="radio" name="size" value="large">
        <select name="drink"><option>cola</option><option value="tea" selected>Iced tea</option></select>
        <select name="sides" multiple><option value="fries" selected>Fries</option><option value="salad">Salad</option></select>
        <textarea name="comments">ring twice</textarea>
        <input type="hidden" name="token" value="abc">
        <input type="text" name="coupon" value="X" disabled>
        <input type="file" name="photo">
      </form>
      <form action=""><input name="only"></form>
    </body></html>"#;

    fn forms() -> Vec<Form> {
        let doc = Document::new(
            Url::parse("https://pizza.example/menu/index.html").unwrap(),
            PAGE,
        );
        Form::extract(&doc)
    }

    fn order() -> Form {
        forms().remove(1)
    }

    #[test]
    fn test_extract_and_method() {
        let forms = forms();
        assert_eq!(forms.len(), 3);
        assert_eq!(forms[0].method(), Method::GET);
        assert_eq!(forms[1].method(), Method::POST);
        assert_eq!(forms[2].method(), Method::GET);
    }

    #[test]
    fn test_action_url() {
        let forms = forms();
        assert_eq!(forms[0].action_url().unwrap().as_str(), "https://pizza.example/s");
        assert_eq!(
            forms[1].action_url().unwrap().as_str(),
            "https://pizza.example/order"
        );
        assert_eq!(
            forms[2].action_url().unwrap().as_str(),
            "https://pizza.example/menu/index.html"
        );
    }

    #[test]
    fn test_field_views() {
        let form = order();
        let fields = form.fields();

        assert_eq!(fields["custname"].value.as_str(), Some(""));
        assert_eq!(fields["custname"].kind, "text");
        assert!(fields["custname"].value_options.is_none());

        assert_eq!(
            fields["topping"].value,
            FieldValue::Multiple(vec!["cheese".to_string()])
        );
        assert_eq!(
            fields["topping"].value_options.as_deref(),
            Some(&["bacon".to_string(), "cheese".to_string(), "onion".to_string()][..])
        );

        assert_eq!(fields["delivery"].value, FieldValue::None);
        assert_eq!(fields["size"].value.as_str(), Some("medium"));
        assert_eq!(fields["size"].kind, "radio");
        assert_eq!(fields["drink"].value.as_str(), Some("tea"));
        assert_eq!(
            fields["drink"].value_options,
            Some(vec!["cola".to_string(), "tea".to_string()])
        );
        assert_eq!(fields["sides"].value, FieldValue::Multiple(vec!["fries".to_string()]));
        assert_eq!(fields["comments"].tag, "textarea");
        assert_eq!(fields["comments"].value.as_str(), Some("ring twice"));
        assert_eq!(fields["photo"].kind, "file");
    }

    #[test]
    fn test_has_fields() {
        let form = order();
        assert!(form.has_fields(&["custname", "topping"]));
        assert!(!form.has_fields(&["custname", "missing"]));
        assert!(form.has_fields::<&str>(&[]));
    }

    #[test]
    fn test_set_fields_round_trip() {
        let mut form = order();
        form.set_fields([
            ("topping", FieldInput::from(["bacon", "onion"])),
            ("custname", FieldInput::from("Ann")),
            ("size", FieldInput::from("large")),
            ("sides", FieldInput::from(["fries", "salad"])),
        ])
        .unwrap();

        let field = form.field("topping").unwrap();
        let mut selected = field.value.to_vec();
        selected.sort();
        assert_eq!(selected, vec!["bacon", "onion"]);
        assert_eq!(form.field("custname").unwrap().value.as_str(), Some("Ann"));
        assert_eq!(form.field("size").unwrap().value.as_str(), Some("large"));
        assert_eq!(
            form.field("sides").unwrap().value.to_vec(),
            vec!["fries", "salad"]
        );
    }

    #[test]
    fn test_set_fields_is_all_or_nothing() {
        let mut form = order();
        let result = form.set_fields([
            ("custname", FieldInput::from("Ann")),
            ("nonexistent", FieldInput::from("x")),
        ]);
        assert!(matches!(result, Err(FormError::UnknownField(ref n)) if n == "nonexistent"));
        assert_eq!(form.field("custname").unwrap().value.as_str(), Some(""));

        let result = form.set_field("size", "huge");
        assert!(matches!(result, Err(FormError::InvalidValue { .. })));
        assert_eq!(form.field("size").unwrap().value.as_str(), Some("medium"));
    }

    #[test]
    fn test_missing_field_reads_as_none() {
        assert!(order().field("nope").is_none());
    }

    #[test]
    fn test_files_are_kept_apart() {
        let mut form = order();
        form.set_field("photo", FileUpload::new("pie.jpg", b"\xff\xd8".to_vec()))
            .unwrap();
        assert!(form.files().contains_key("photo"));
        assert!(form.form_values().iter().all(|(k, _)| k != "photo"));
        assert_eq!(form.field("photo").unwrap().value.as_str(), Some("pie.jpg"));

        let (query, body) = form.submission_body(&[]);
        assert!(query.is_empty());
        match body {
            Body::Multipart { files, .. } => assert_eq!(files[0].0, "photo"),
            other => panic!("expected multipart body, got {:?}", other),
        }
    }

    #[test]
    fn test_file_upload_promotes_get_to_post() {
        let doc = Document::new(
            Url::parse("https://pizza.example/").unwrap(),
            r#"<form action="/up"><input name="q" value="v"><input type="file" name="doc"></form>"#,
        );
        let mut form = Form::extract(&doc).remove(0);
        assert_eq!(form.submission_method(), Method::GET);

        form.set_field("doc", FileUpload::new("a.txt", "hi")).unwrap();
        assert_eq!(form.method(), Method::GET);
        assert_eq!(form.submission_method(), Method::POST);
        let (query, body) = form.submission_body(&[]);
        assert!(query.is_empty());
        assert!(matches!(body, Body::Multipart { .. }));
        assert_eq!(order().submission_method(), Method::POST);
    }

    #[test]
    fn test_form_values() {
        let values = order().form_values();
        let expected: Vec<(String, String)> = [
            ("custname", ""),
            ("topping", "cheese"),
            ("size", "medium"),
            ("drink", "tea"),
            ("sides", "fries"),
            ("comments", "ring twice"),
            ("token", "abc"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn test_submission_body_keeps_duplicate_extra_values() {
        let form = forms().remove(0);
        let extra = vec![
            ("q".to_string(), "puppies".to_string()),
            ("page".to_string(), "2".to_string()),
        ];
        let (query, body) = form.submission_body(&extra);
        assert!(body.is_empty());
        assert_eq!(
            query,
            vec![
                ("q".to_string(), "kittens".to_string()),
                ("q".to_string(), "puppies".to_string()),
                ("page".to_string(), "2".to_string()),
            ]
        );
    }

    #[test]
    fn test_form_filter() {
        let doc = Document::new(Url::parse("https://pizza.example/").unwrap(), PAGE);
        assert_eq!(doc.forms(&FormFilter::new()).len(), 3);
        assert_eq!(doc.forms(&FormFilter::new().id("search")).len(), 1);
        assert_eq!(doc.forms(&FormFilter::new().name("order")).len(), 1);
        assert_eq!(doc.forms(&FormFilter::new().action("/s")).len(), 1);
        assert_eq!(
            doc.forms(&FormFilter::new().has_fields(["topping", "size"]))
                .len(),
            1
        );
        assert!(doc.forms(&FormFilter::new().id("search").has_fields(["topping"])).is_empty());
    }
}
