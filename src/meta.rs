//! Metadata attached to records, fields, functions and parameters.
//!
//! Attributes arrive one at a time from the parser (`<a, b=c, …>`); the
//! engine validates them against the owner kind and language dialect, folds
//! access-flag attributes into a flag word, and runs the multi-line
//! annotation builder state machine.

use std::collections::{HashMap, HashSet};

use crate::annotation::{AnnotationData, AnnotationElement, ArrayValue, ScalarValue, Value, ValueKind};
use crate::lang::Language;
use crate::parser::number::{float_number, integer_number, validate_float, validate_integer};
use crate::types::Type;

pub const ACC_PUBLIC: u32 = 0x0001;
pub const ACC_PRIVATE: u32 = 0x0002;
pub const ACC_PROTECTED: u32 = 0x0004;
pub const ACC_STATIC: u32 = 0x0008;
pub const ACC_FINAL: u32 = 0x0010;
pub const ACC_VOLATILE: u32 = 0x0040;
pub const ACC_NATIVE: u32 = 0x0100;
pub const ACC_INTERFACE: u32 = 0x0200;
pub const ACC_ABSTRACT: u32 = 0x0400;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaErrorKind {
    InvalidValue,
    MissingAttribute,
    MissingValue,
    MultipleAttribute,
    UnexpectedAttribute,
    UnexpectedValue,
    UnknownAttribute,
}

#[derive(Debug, Clone)]
pub struct MetaError {
    pub message: String,
    pub kind: MetaErrorKind,
}

impl MetaError {
    fn new(message: impl Into<String>, kind: MetaErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    fn unexpected(attribute: &str, why: &str) -> Self {
        Self::new(
            format!("Unexpected attribute '{}'. {}", attribute, why),
            MetaErrorKind::UnexpectedAttribute,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerKind {
    Record,
    Field,
    Function,
    Param,
}

const ANN_RECORD_ATTR: &str = "panda.annotation.class";
const ANN_ID_ATTR: &str = "panda.annotation.id";
const ANN_ELEMENT_NAME_ATTR: &str = "panda.annotation.element.name";
const ANN_ELEMENT_TYPE_ATTR: &str = "panda.annotation.element.type";
const ANN_ELEMENT_COMPONENT_ATTR: &str = "panda.annotation.element.array.component.type";
const ANN_ELEMENT_VALUE_ATTR: &str = "panda.annotation.element.value";

fn known_bool_attributes(owner: OwnerKind, _lang: Language) -> &'static [&'static str] {
    match owner {
        OwnerKind::Record => &[
            "external",
            "public",
            "protected",
            "private",
            "final",
            "abstract",
            "interface",
            "annotation",
            "runtime_annotation",
            "type_annotation",
            "runtime_type_annotation",
            "enum",
        ],
        OwnerKind::Field => &[
            "external", "static", "final", "public", "protected", "private", "volatile", "enum",
        ],
        OwnerKind::Function => &[
            "external", "native", "noimpl", "static", "ctor", "cctor", "final", "public",
            "protected", "private",
        ],
        OwnerKind::Param => &[],
    }
}

fn known_value_attributes(owner: OwnerKind, lang: Language) -> &'static [&'static str] {
    match (owner, lang) {
        (OwnerKind::Record, Language::PandaAssembly) => &["extends", "implements", "access.record"],
        (OwnerKind::Record, Language::EcmaScript) => &["ecmascript.extends", "access.record"],
        (OwnerKind::Field, _) => &["value", "access.field"],
        (OwnerKind::Function, _) => &["access.function"],
        (OwnerKind::Param, _) => &[],
    }
}

/// Attributes that may appear at most once.
fn is_single_valued(attribute: &str) -> bool {
    matches!(
        attribute,
        "extends" | "ecmascript.extends" | "value" | "access.record" | "access.field" | "access.function"
    )
}

fn flag_of_bool_attribute(attribute: &str) -> u32 {
    match attribute {
        "public" => ACC_PUBLIC,
        "private" => ACC_PRIVATE,
        "protected" => ACC_PROTECTED,
        "static" => ACC_STATIC,
        "final" => ACC_FINAL,
        "volatile" => ACC_VOLATILE,
        "native" => ACC_NATIVE,
        "interface" => ACC_INTERFACE,
        "abstract" | "noimpl" => ACC_ABSTRACT,
        "annotation" | "runtime_annotation" | "type_annotation" | "runtime_type_annotation" => {
            ACC_ANNOTATION
        }
        "enum" => ACC_ENUM,
        _ => 0,
    }
}

/// Explicit state of the annotation builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum AnnState {
    #[default]
    Idle,
    InAnnotation,
    InElementName,
    InElementType,
    InElementComponentType,
    InElementValue,
}

#[derive(Debug, Default)]
struct AnnotationBuilder {
    name: String,
    id: Option<String>,
    elements: Vec<AnnotationElement>,
}

#[derive(Debug, Default)]
struct ElementBuilder {
    name: String,
    kind: Option<ValueKind>,
    component_kind: Option<ValueKind>,
    values: Vec<ScalarValue>,
}

impl ElementBuilder {
    fn is_array(&self) -> bool {
        self.kind == Some(ValueKind::Array)
    }

    fn is_completed(&self) -> bool {
        match self.kind {
            None => false,
            Some(ValueKind::Array) => self.component_kind.is_some(),
            Some(_) => !self.values.is_empty(),
        }
    }

    fn build(mut self) -> AnnotationElement {
        let value = if self.is_array() {
            Value::Array(ArrayValue {
                component_kind: self.component_kind.unwrap_or(ValueKind::Void),
                values: std::mem::take(&mut self.values),
            })
        } else {
            Value::Scalar(self.values.remove(0))
        };
        AnnotationElement {
            name: std::mem::take(&mut self.name),
            value,
        }
    }
}

fn parse_integral<T>(value: &str, convert: impl Fn(i64) -> Option<T>) -> Result<T, MetaError> {
    if !validate_integer(value) {
        return Err(MetaError::new("Excepted integer literal", MetaErrorKind::InvalidValue));
    }
    let v = integer_number(value)
        .ok_or_else(|| MetaError::new("Value is out of range", MetaErrorKind::InvalidValue))?;
    convert(v).ok_or_else(|| MetaError::new("Value is out of range", MetaErrorKind::InvalidValue))
}

fn parse_unsigned<T>(value: &str, convert: impl Fn(u64) -> Option<T>) -> Result<T, MetaError> {
    if !validate_integer(value) || value.starts_with('-') {
        return Err(MetaError::new("Excepted integer literal", MetaErrorKind::InvalidValue));
    }
    let v = integer_number(value)
        .ok_or_else(|| MetaError::new("Value is out of range", MetaErrorKind::InvalidValue))?;
    convert(v as u64).ok_or_else(|| MetaError::new("Value is out of range", MetaErrorKind::InvalidValue))
}

fn parse_float(value: &str) -> Result<f64, MetaError> {
    if !validate_float(value) {
        return Err(MetaError::new("Excepted float literal", MetaErrorKind::InvalidValue));
    }
    float_number(value).ok_or_else(|| MetaError::new("Value is out of range", MetaErrorKind::InvalidValue))
}

/// Parses one scalar value of the given kind. `u1` only admits 0 and 1;
/// narrow integers must fit their width.
pub fn create_value(
    kind: ValueKind,
    value: &str,
    annotation_id_map: &HashMap<String, AnnotationData>,
) -> Result<ScalarValue, MetaError> {
    match kind {
        ValueKind::U1 => parse_unsigned(value, |v| if v <= 1 { Some(v as u8) } else { None })
            .map(ScalarValue::U1),
        ValueKind::I8 => parse_integral(value, |v| i8::try_from(v).ok()).map(ScalarValue::I8),
        ValueKind::U8 => parse_unsigned(value, |v| u8::try_from(v).ok()).map(ScalarValue::U8),
        ValueKind::I16 => parse_integral(value, |v| i16::try_from(v).ok()).map(ScalarValue::I16),
        ValueKind::U16 => parse_unsigned(value, |v| u16::try_from(v).ok()).map(ScalarValue::U16),
        ValueKind::I32 => parse_integral(value, |v| i32::try_from(v).ok()).map(ScalarValue::I32),
        ValueKind::U32 => parse_unsigned(value, |v| u32::try_from(v).ok()).map(ScalarValue::U32),
        ValueKind::I64 => parse_integral(value, Some).map(ScalarValue::I64),
        ValueKind::U64 => parse_unsigned(value, Some).map(ScalarValue::U64),
        ValueKind::F32 => parse_float(value).map(|v| ScalarValue::F32(v as f32)),
        ValueKind::F64 => parse_float(value).map(ScalarValue::F64),
        ValueKind::String => Ok(ScalarValue::String(value.to_string())),
        ValueKind::Record => Ok(ScalarValue::Record(Type::from_name(value))),
        ValueKind::Method => Ok(ScalarValue::Method(value.to_string())),
        ValueKind::Enum => Ok(ScalarValue::Enum(value.to_string())),
        ValueKind::Annotation => match annotation_id_map.get(value) {
            Some(data) => Ok(ScalarValue::Annotation(data.clone())),
            None => Err(MetaError::new("Unknown annotation id", MetaErrorKind::InvalidValue)),
        },
        _ => Err(MetaError::new("Value of unexpected kind", MetaErrorKind::InvalidValue)),
    }
}

/// Common attribute storage plus the annotation stream builder.
#[derive(Debug)]
pub struct AnnotationMetadata {
    lang: Language,
    owner: OwnerKind,
    bool_attributes: HashSet<String>,
    attributes: HashMap<String, Vec<String>>,
    access_flags: u32,
    annotations: Vec<AnnotationData>,
    id_map: HashMap<String, AnnotationData>,
    state: AnnState,
    annotation_builder: Option<AnnotationBuilder>,
    element_builder: Option<ElementBuilder>,
}

impl AnnotationMetadata {
    pub fn new(lang: Language, owner: OwnerKind) -> Self {
        Self {
            lang,
            owner,
            bool_attributes: HashSet::new(),
            attributes: HashMap::new(),
            access_flags: 0,
            annotations: Vec::new(),
            id_map: HashMap::new(),
            state: AnnState::Idle,
            annotation_builder: None,
            element_builder: None,
        }
    }

    pub fn language(&self) -> Language {
        self.lang
    }

    pub fn access_flags(&self) -> u32 {
        self.access_flags
    }

    pub fn set_access_flags(&mut self, access_flags: u32) {
        self.access_flags = access_flags;
    }

    pub fn get_attribute(&self, attribute: &str) -> bool {
        self.bool_attributes.contains(attribute)
    }

    pub fn get_attribute_values(&self, attribute: &str) -> &[String] {
        self.attributes.get(attribute).map_or(&[], |v| v.as_slice())
    }

    pub fn get_attribute_value(&self, attribute: &str) -> Option<&str> {
        self.get_attribute_values(attribute).first().map(|s| s.as_str())
    }

    pub fn is_foreign(&self) -> bool {
        self.get_attribute("external")
    }

    pub fn annotations(&self) -> &[AnnotationData] {
        &self.annotations
    }

    pub fn add_annotations(&mut self, annotations: Vec<AnnotationData>) {
        self.annotations.extend(annotations);
    }

    /// A bool attribute (`<name>`).
    pub fn set_attribute(&mut self, attribute: &str) -> Option<MetaError> {
        if let Err(err) = self.validate_bool(attribute) {
            return Some(err);
        }

        if let Some(elem) = &self.element_builder {
            if !elem.is_completed() {
                return Some(MetaError::unexpected(
                    attribute,
                    "Annotation element isn't completely defined",
                ));
            }
        }
        if let Err(err) = self.flush_annotation() {
            return Some(err);
        }

        self.access_flags |= flag_of_bool_attribute(attribute);
        self.bool_attributes.insert(attribute.to_string());
        None
    }

    /// A key=value attribute.
    pub fn set_attribute_value(&mut self, attribute: &str, value: &str) -> Option<MetaError> {
        if let Err(err) = self.validate_value(attribute, value) {
            return Some(err);
        }

        if self.is_annotation_attribute(attribute) {
            return self.meet_annotation_attribute(attribute, value).err();
        }

        if let Some(elem) = &self.element_builder {
            if !elem.is_completed() {
                return Some(MetaError::unexpected(
                    attribute,
                    "Annotation element isn't completely defined",
                ));
            }
        }
        if let Err(err) = self.flush_annotation() {
            return Some(err);
        }

        if let Err(err) = self.apply_value_flags(attribute, value) {
            return Some(err);
        }
        self.attributes
            .entry(attribute.to_string())
            .or_default()
            .push(value.to_string());
        None
    }

    /// Called when the owner's metadata ends; flushes any pending
    /// annotation and reports incomplete elements.
    pub fn validate_data(&mut self) -> Option<MetaError> {
        if let Some(elem) = &self.element_builder {
            if !elem.is_completed() {
                return Some(MetaError::new(
                    "Annotation element isn't completely defined",
                    MetaErrorKind::MissingAttribute,
                ));
            }
        }
        self.flush_annotation().err()
    }

    fn validate_bool(&self, attribute: &str) -> Result<(), MetaError> {
        if known_bool_attributes(self.owner, self.lang).contains(&attribute) {
            return Ok(());
        }
        if known_value_attributes(self.owner, self.lang).contains(&attribute)
            || self.is_annotation_attribute(attribute)
        {
            return Err(MetaError::new(
                format!("Attribute '{}' must have a value", attribute),
                MetaErrorKind::MissingValue,
            ));
        }
        Err(MetaError::new(
            format!("Unknown attribute '{}'", attribute),
            MetaErrorKind::UnknownAttribute,
        ))
    }

    fn validate_value(&self, attribute: &str, _value: &str) -> Result<(), MetaError> {
        if self.is_annotation_attribute(attribute) {
            return Ok(());
        }
        if known_value_attributes(self.owner, self.lang).contains(&attribute) {
            if is_single_valued(attribute) && self.attributes.contains_key(attribute) {
                return Err(MetaError::new(
                    format!("Attribute '{}' already defined", attribute),
                    MetaErrorKind::MultipleAttribute,
                ));
            }
            return Ok(());
        }
        if known_bool_attributes(self.owner, self.lang).contains(&attribute) {
            return Err(MetaError::new(
                format!("Attribute '{}' must not have a value", attribute),
                MetaErrorKind::UnexpectedValue,
            ));
        }
        Err(MetaError::new(
            format!("Unknown attribute '{}'", attribute),
            MetaErrorKind::UnknownAttribute,
        ))
    }

    fn apply_value_flags(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        if matches!(attribute, "access.record" | "access.field" | "access.function") {
            let flag = match value {
                "public" => ACC_PUBLIC,
                "protected" => ACC_PROTECTED,
                "private" => ACC_PRIVATE,
                _ => {
                    return Err(MetaError::new(
                        format!("Invalid value '{}' for attribute '{}'", value, attribute),
                        MetaErrorKind::InvalidValue,
                    ))
                }
            };
            self.access_flags |= flag;
        }
        Ok(())
    }

    /// The ECMAScript dialect carries no annotation stream.
    fn is_annotation_attribute(&self, attribute: &str) -> bool {
        if self.lang == Language::EcmaScript {
            return false;
        }
        matches!(
            attribute,
            ANN_RECORD_ATTR
                | ANN_ID_ATTR
                | ANN_ELEMENT_NAME_ATTR
                | ANN_ELEMENT_TYPE_ATTR
                | ANN_ELEMENT_COMPONENT_ATTR
                | ANN_ELEMENT_VALUE_ATTR
        )
    }

    fn meet_annotation_attribute(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        match attribute {
            ANN_RECORD_ATTR => self.meet_record(attribute, value),
            ANN_ID_ATTR => self.meet_id(attribute, value),
            ANN_ELEMENT_NAME_ATTR => self.meet_element_name(attribute, value),
            ANN_ELEMENT_TYPE_ATTR => self.meet_element_type(attribute, value),
            ANN_ELEMENT_COMPONENT_ATTR => self.meet_element_component_type(attribute, value),
            ANN_ELEMENT_VALUE_ATTR => self.meet_element_value(attribute, value),
            _ => Ok(()),
        }
    }

    fn meet_record(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        if let Some(elem) = &self.element_builder {
            if !elem.is_completed() {
                return Err(MetaError::unexpected(
                    attribute,
                    "Annotation element isn't completely defined",
                ));
            }
        }
        self.flush_annotation()?;
        self.annotation_builder = Some(AnnotationBuilder {
            name: value.to_string(),
            id: None,
            elements: Vec::new(),
        });
        self.state = AnnState::InAnnotation;
        Ok(())
    }

    fn meet_id(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        if self.state != AnnState::InAnnotation {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation record attribute must be defined first",
            ));
        }
        let builder = self.annotation_builder.as_mut().unwrap();
        if builder.id.is_some() {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation id attribute already defined",
            ));
        }
        builder.id = Some(value.to_string());
        Ok(())
    }

    fn meet_element_name(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        if self.state == AnnState::Idle {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation record attribute must be defined first",
            ));
        }
        if let Some(elem) = self.element_builder.take() {
            if !elem.is_completed() {
                return Err(MetaError::unexpected(
                    attribute,
                    "Previous annotation element isn't defined completely",
                ));
            }
            self.annotation_builder.as_mut().unwrap().elements.push(elem.build());
        }
        self.element_builder = Some(ElementBuilder {
            name: value.to_string(),
            ..Default::default()
        });
        self.state = AnnState::InElementName;
        Ok(())
    }

    fn meet_element_type(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        let elem = self.element_builder.as_mut().ok_or_else(|| {
            MetaError::unexpected(attribute, "Annotation element name attribute must be defined first")
        })?;
        if elem.kind.is_some() {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation element type attribute already defined",
            ));
        }
        elem.kind = Some(ValueKind::from_keyword(value));
        self.state = AnnState::InElementType;
        Ok(())
    }

    fn meet_element_component_type(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        let elem = self.element_builder.as_mut().ok_or_else(|| {
            MetaError::unexpected(attribute, "Annotation element name attribute must be defined first")
        })?;
        if !elem.is_array() {
            return Err(MetaError::unexpected(attribute, "Annotation element type isn't array"));
        }
        if elem.component_kind.is_some() {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation element array component type attribute already defined",
            ));
        }
        elem.component_kind = Some(ValueKind::from_keyword(value));
        self.state = AnnState::InElementComponentType;
        Ok(())
    }

    fn meet_element_value(&mut self, attribute: &str, value: &str) -> Result<(), MetaError> {
        let elem = self.element_builder.as_mut().ok_or_else(|| {
            MetaError::unexpected(attribute, "Annotation element name attribute must be defined first")
        })?;
        let kind = match elem.kind {
            Some(kind) => kind,
            None => {
                return Err(MetaError::unexpected(
                    attribute,
                    "Annotation element type attribute isn't defined",
                ))
            }
        };
        if elem.is_array() && elem.component_kind.is_none() {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation element array component type attribute isn't defined",
            ));
        }
        if !elem.is_array() && elem.is_completed() {
            return Err(MetaError::unexpected(
                attribute,
                "Annotation element is completely defined",
            ));
        }

        let kind = if elem.is_array() {
            elem.component_kind.unwrap_or(ValueKind::Void)
        } else {
            kind
        };
        let scalar = create_value(kind, value, &self.id_map)?;
        self.element_builder.as_mut().unwrap().values.push(scalar);
        self.state = AnnState::InElementValue;
        Ok(())
    }

    fn flush_annotation(&mut self) -> Result<(), MetaError> {
        if let Some(elem) = self.element_builder.take() {
            debug_assert!(elem.is_completed());
            if let Some(builder) = self.annotation_builder.as_mut() {
                builder.elements.push(elem.build());
            }
        }

        if let Some(builder) = self.annotation_builder.take() {
            let data = AnnotationData {
                record_name: builder.name,
                elements: builder.elements,
            };
            match builder.id {
                Some(id) => {
                    self.id_map.insert(id, data);
                }
                None => self.annotations.push(data),
            }
        }

        self.state = AnnState::Idle;
        Ok(())
    }
}

macro_rules! delegate_metadata {
    ($ty:ty) => {
        impl $ty {
            pub fn set_attribute(&mut self, attribute: &str) -> Option<MetaError> {
                self.inner.set_attribute(attribute)
            }

            pub fn validate_data(&mut self) -> Option<MetaError> {
                self.inner.validate_data()
            }

            pub fn get_attribute(&self, attribute: &str) -> bool {
                self.inner.get_attribute(attribute)
            }

            pub fn get_attribute_value(&self, attribute: &str) -> Option<&str> {
                self.inner.get_attribute_value(attribute)
            }

            pub fn access_flags(&self) -> u32 {
                self.inner.access_flags()
            }

            pub fn set_access_flags(&mut self, flags: u32) {
                self.inner.set_access_flags(flags)
            }

            pub fn is_foreign(&self) -> bool {
                self.inner.is_foreign()
            }

            pub fn annotations(&self) -> &[AnnotationData] {
                self.inner.annotations()
            }

            pub fn add_annotations(&mut self, annotations: Vec<AnnotationData>) {
                self.inner.add_annotations(annotations)
            }
        }
    };
}

#[derive(Debug)]
pub struct RecordMetadata {
    inner: AnnotationMetadata,
}

delegate_metadata!(RecordMetadata);

impl RecordMetadata {
    pub fn new(lang: Language) -> Self {
        Self {
            inner: AnnotationMetadata::new(lang, OwnerKind::Record),
        }
    }

    pub fn set_attribute_value(&mut self, attribute: &str, value: &str) -> Option<MetaError> {
        self.inner.set_attribute_value(attribute, value)
    }

    pub fn base(&self) -> Option<&str> {
        match self.inner.language() {
            Language::PandaAssembly => self.inner.get_attribute_value("extends"),
            Language::EcmaScript => self.inner.get_attribute_value("ecmascript.extends"),
        }
    }

    pub fn interfaces(&self) -> &[String] {
        match self.inner.language() {
            Language::PandaAssembly => self.inner.get_attribute_values("implements"),
            Language::EcmaScript => &[],
        }
    }

    pub fn is_annotation(&self) -> bool {
        match self.inner.language() {
            Language::PandaAssembly => self.inner.get_attribute("annotation"),
            Language::EcmaScript => (self.access_flags() & ACC_ANNOTATION) != 0,
        }
    }

    pub fn is_runtime_annotation(&self) -> bool {
        self.inner.get_attribute("runtime_annotation")
    }

    pub fn is_type_annotation(&self) -> bool {
        self.inner.get_attribute("type_annotation")
    }

    pub fn is_runtime_type_annotation(&self) -> bool {
        self.inner.get_attribute("runtime_type_annotation")
    }
}

#[derive(Debug)]
pub struct FieldMetadata {
    inner: AnnotationMetadata,
    field_type: Type,
    value: Option<ScalarValue>,
}

delegate_metadata!(FieldMetadata);

impl FieldMetadata {
    pub fn new(lang: Language) -> Self {
        Self {
            inner: AnnotationMetadata::new(lang, OwnerKind::Field),
            field_type: Type::default(),
            value: None,
        }
    }

    pub fn set_field_type(&mut self, type_: Type) {
        self.field_type = type_;
    }

    pub fn field_type(&self) -> &Type {
        &self.field_type
    }

    /// `value=` parses according to the declared field type; reference-typed
    /// fields accept string constants.
    pub fn set_attribute_value(&mut self, attribute: &str, value: &str) -> Option<MetaError> {
        if let Some(err) = self.inner.set_attribute_value(attribute, value) {
            return Some(err);
        }

        if attribute == "value" {
            let value_kind = if !self.field_type.is_object() {
                ValueKind::from_keyword(self.field_type.name())
            } else {
                ValueKind::String
            };
            match create_value(value_kind, value, &HashMap::new()) {
                Ok(v) => self.value = Some(v),
                Err(err) => return Some(err),
            }
        }
        None
    }

    pub fn value(&self) -> Option<&ScalarValue> {
        self.value.as_ref()
    }
}

#[derive(Debug)]
pub struct FunctionMetadata {
    inner: AnnotationMetadata,
}

delegate_metadata!(FunctionMetadata);

impl FunctionMetadata {
    pub fn new(lang: Language) -> Self {
        Self {
            inner: AnnotationMetadata::new(lang, OwnerKind::Function),
        }
    }

    pub fn set_attribute_value(&mut self, attribute: &str, value: &str) -> Option<MetaError> {
        self.inner.set_attribute_value(attribute, value)
    }

    pub fn has_implementation(&self) -> bool {
        (self.access_flags() & (ACC_ABSTRACT | ACC_NATIVE)) == 0
    }

    pub fn is_ctor(&self) -> bool {
        self.inner.get_attribute("ctor")
    }

    pub fn is_cctor(&self) -> bool {
        self.inner.get_attribute("cctor")
    }
}

#[derive(Debug)]
pub struct ParamMetadata {
    inner: AnnotationMetadata,
}

delegate_metadata!(ParamMetadata);

impl ParamMetadata {
    pub fn new(lang: Language) -> Self {
        Self {
            inner: AnnotationMetadata::new(lang, OwnerKind::Param),
        }
    }

    pub fn set_attribute_value(&mut self, attribute: &str, value: &str) -> Option<MetaError> {
        self.inner.set_attribute_value(attribute, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_attribute_sets_flags() {
        let mut meta = FunctionMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute("static").is_none());
        assert!(meta.set_attribute("native").is_none());
        assert_eq!(meta.access_flags() & ACC_STATIC, ACC_STATIC);
        assert_eq!(meta.access_flags() & ACC_NATIVE, ACC_NATIVE);
        assert!(!meta.has_implementation());
    }

    #[test]
    fn test_external_is_foreign() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(!meta.is_foreign());
        assert!(meta.set_attribute("external").is_none());
        assert!(meta.is_foreign());
    }

    #[test]
    fn test_unknown_attribute() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        let err = meta.set_attribute("bogus").unwrap();
        assert_eq!(err.kind, MetaErrorKind::UnknownAttribute);
    }

    #[test]
    fn test_value_attribute_without_value() {
        let mut meta = FieldMetadata::new(Language::PandaAssembly);
        let err = meta.set_attribute("value").unwrap();
        assert_eq!(err.kind, MetaErrorKind::MissingValue);
    }

    #[test]
    fn test_bool_attribute_with_value() {
        let mut meta = FieldMetadata::new(Language::PandaAssembly);
        let err = meta.set_attribute_value("static", "yes").unwrap();
        assert_eq!(err.kind, MetaErrorKind::UnexpectedValue);
    }

    #[test]
    fn test_field_value_by_type() {
        let mut meta = FieldMetadata::new(Language::PandaAssembly);
        meta.set_field_type(Type::new("i32", 0));
        assert!(meta.set_attribute_value("value", "42").is_none());
        assert_eq!(meta.value(), Some(&ScalarValue::I32(42)));
    }

    #[test]
    fn test_field_value_range_check() {
        let mut meta = FieldMetadata::new(Language::PandaAssembly);
        meta.set_field_type(Type::new("u1", 0));
        let err = meta.set_attribute_value("value", "2").unwrap();
        assert_eq!(err.kind, MetaErrorKind::InvalidValue);
    }

    #[test]
    fn test_access_attribute() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute_value("access.record", "protected").is_none());
        assert_eq!(meta.access_flags() & ACC_PROTECTED, ACC_PROTECTED);
        let err = meta.set_attribute_value("access.record", "public").unwrap();
        assert_eq!(err.kind, MetaErrorKind::MultipleAttribute);
    }

    #[test]
    fn test_ecmascript_extends() {
        let mut meta = RecordMetadata::new(Language::EcmaScript);
        assert!(meta.set_attribute_value("ecmascript.extends", "Base").is_none());
        assert_eq!(meta.base(), Some("Base"));
    }

    #[test]
    fn test_annotation_stream() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "A").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_NAME_ATTR, "x").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_TYPE_ATTR, "i32").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_VALUE_ATTR, "7").is_none());
        assert!(meta.validate_data().is_none());

        let anns = meta.annotations();
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].record_name, "A");
        assert_eq!(anns[0].elements.len(), 1);
        assert_eq!(anns[0].elements[0].name, "x");
        assert_eq!(
            anns[0].elements[0].value,
            Value::Scalar(ScalarValue::I32(7))
        );
    }

    #[test]
    fn test_annotation_array_element() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "A").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_NAME_ATTR, "xs").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_TYPE_ATTR, "array").is_none());
        assert!(meta
            .set_attribute_value(ANN_ELEMENT_COMPONENT_ATTR, "u8")
            .is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_VALUE_ATTR, "1").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_VALUE_ATTR, "2").is_none());
        assert!(meta.validate_data().is_none());

        let anns = meta.annotations();
        let value = &anns[0].elements[0].value;
        assert_eq!(value.tag_char(), 'M');
        assert_eq!(
            value.as_array().unwrap().values,
            vec![ScalarValue::U8(1), ScalarValue::U8(2)]
        );
    }

    #[test]
    fn test_annotation_value_before_type() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "A").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_NAME_ATTR, "x").is_none());
        let err = meta.set_attribute_value(ANN_ELEMENT_VALUE_ATTR, "7").unwrap();
        assert_eq!(err.kind, MetaErrorKind::UnexpectedAttribute);
    }

    #[test]
    fn test_annotation_incomplete_element_at_end() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "A").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_NAME_ATTR, "x").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_TYPE_ATTR, "i32").is_none());
        let err = meta.validate_data().unwrap();
        assert_eq!(err.kind, MetaErrorKind::MissingAttribute);
    }

    #[test]
    fn test_annotation_id_reference() {
        let mut meta = RecordMetadata::new(Language::PandaAssembly);
        // first annotation registered under an id
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "Inner").is_none());
        assert!(meta.set_attribute_value(ANN_ID_ATTR, "id0").is_none());
        // second annotation references the first by id
        assert!(meta.set_attribute_value(ANN_RECORD_ATTR, "Outer").is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_NAME_ATTR, "inner").is_none());
        assert!(meta
            .set_attribute_value(ANN_ELEMENT_TYPE_ATTR, "annotation")
            .is_none());
        assert!(meta.set_attribute_value(ANN_ELEMENT_VALUE_ATTR, "id0").is_none());
        assert!(meta.validate_data().is_none());

        let anns = meta.annotations();
        assert_eq!(anns.len(), 1);
        assert_eq!(anns[0].record_name, "Outer");
        match &anns[0].elements[0].value {
            Value::Scalar(ScalarValue::Annotation(inner)) => {
                assert_eq!(inner.record_name, "Inner");
            }
            other => panic!("unexpected value {:?}", other),
        }
    }

    #[test]
    fn test_ecmascript_has_no_annotation_stream() {
        let mut meta = RecordMetadata::new(Language::EcmaScript);
        let err = meta.set_attribute_value(ANN_RECORD_ATTR, "A").unwrap();
        assert_eq!(err.kind, MetaErrorKind::UnknownAttribute);
    }
}
