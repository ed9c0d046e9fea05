use crate::error::QglSyntaxError;
use crate::format::{Container, ValueFormat};

/// Whether a parameter's value comes from the caller or from the parent frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterClass {
    /// `{% name %}` — supplied by the caller at execution time.
    Independent,
    /// `{{ name }}` — derived from the parent node's frame.
    Dependent,
}

/// A parsed template parameter: `name [| modifier [: type]]`.
///
/// `modifier` is `value` (scalar literal, the default) or `value_list`
/// (container literal); `type` is a [`ValueFormat`] hint checked at render
/// time.
#[derive(Clone, Debug, PartialEq)]
pub struct TemplateParameter {
    pub name: String,
    pub container: Container,
    pub format: Option<ValueFormat>,
    pub class: ParameterClass,
}

fn is_identifier(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

impl TemplateParameter {
    /// Parses the text between the token delimiters.
    pub fn parse(inner: &str, class: ParameterClass) -> Result<Self, QglSyntaxError> {
        let mut parts = inner.splitn(2, '|');
        let name = parts.next().unwrap_or_default().trim();
        if !is_identifier(name) {
            return Err(QglSyntaxError::new(format!(
                "invalid template parameter name `{name}`"
            )));
        }
        let (container, format) = match parts.next() {
            None => (Container::Scalar, None),
            Some(modifier) => {
                let mut modifier_parts = modifier.splitn(2, ':');
                let container = match modifier_parts.next().unwrap_or_default().trim() {
                    "value" => Container::Scalar,
                    "value_list" => Container::ValueList,
                    other => {
                        return Err(QglSyntaxError::new(format!(
                            "unknown parameter modifier `{other}`"
                        )))
                    }
                };
                let format = match modifier_parts.next() {
                    None => None,
                    Some(type_name) => {
                        let type_name = type_name.trim();
                        Some(ValueFormat::parse(type_name).ok_or_else(|| {
                            QglSyntaxError::new(format!("unknown parameter type `{type_name}`"))
                        })?)
                    }
                };
                (container, format)
            }
        };
        Ok(Self {
            name: name.to_string(),
            container,
            format,
            class,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_defaults_to_scalar_value() {
        let p = TemplateParameter::parse(" ids ", ParameterClass::Independent).unwrap();
        assert_eq!(p.name, "ids");
        assert_eq!(p.container, Container::Scalar);
        assert_eq!(p.format, None);
    }

    #[test]
    fn full_pipeline_parses_modifier_and_type() {
        let p = TemplateParameter::parse("ids|value_list:int", ParameterClass::Independent).unwrap();
        assert_eq!(p.container, Container::ValueList);
        assert_eq!(p.format, Some(ValueFormat::Int));
    }

    #[test]
    fn whitespace_around_parts_is_ignored() {
        let p = TemplateParameter::parse(" album | value_list : str ", ParameterClass::Dependent)
            .unwrap();
        assert_eq!(p.name, "album");
        assert_eq!(p.container, Container::ValueList);
        assert_eq!(p.format, Some(ValueFormat::Str));
    }

    #[test]
    fn unknown_modifier_is_rejected() {
        assert!(TemplateParameter::parse("ids|values", ParameterClass::Independent).is_err());
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(TemplateParameter::parse("ids|value:uuid", ParameterClass::Independent).is_err());
    }

    #[test]
    fn bad_name_is_rejected() {
        assert!(TemplateParameter::parse("9ids", ParameterClass::Independent).is_err());
    }
}
