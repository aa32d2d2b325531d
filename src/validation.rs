//! Turns `validator` results and hand-written required-field checks into the
//! field-keyed error map returned with 422 responses.

use validator::{Validate, ValidationErrors, ValidationErrorsKind};

use crate::error::{AppError, FieldErrors};

/// Collects field errors while a payload is converted into a command.
#[derive(Debug, Default)]
pub struct Errors {
    fields: FieldErrors,
}

impl Errors {
    /// Starts from the declarative rules of `payload`.
    pub fn validate<T: Validate>(payload: &T) -> Self {
        let mut errors = Self::default();
        if let Err(found) = payload.validate() {
            errors.collect("", &found);
        }
        errors
    }

    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.fields
            .entry(field.to_string())
            .or_default()
            .push(message.into());
    }

    /// Returns the value, or records `field` as missing.
    pub fn require<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.add(field, format!("The {} field is required.", label(field)));
        }
        value
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `Ok(value)` when no error was recorded.
    pub fn finish<T>(self, value: impl FnOnce() -> T) -> Result<T, AppError> {
        if self.fields.is_empty() {
            Ok(value())
        } else {
            Err(AppError::Validation(self.fields))
        }
    }

    /// Converts the collected errors into a 422. Callers only reach this after
    /// recording at least one error.
    pub fn into_error(self) -> AppError {
        AppError::Validation(self.fields)
    }

    fn collect(&mut self, prefix: &str, found: &ValidationErrors) {
        for (field, kind) in found.errors() {
            let path = if prefix.is_empty() {
                field.to_string()
            } else {
                format!("{prefix}.{field}")
            };
            match kind {
                ValidationErrorsKind::Field(errors) => {
                    for error in errors {
                        let message = match &error.message {
                            Some(message) => format!("The {} {}.", label(&path), message),
                            None => format!("The {} is invalid ({}).", label(&path), error.code),
                        };
                        self.add(&path, message);
                    }
                }
                ValidationErrorsKind::Struct(inner) => self.collect(&path, inner),
                ValidationErrorsKind::List(items) => {
                    for (index, inner) in items {
                        self.collect(&format!("{path}.{index}"), inner);
                    }
                }
            }
        }
    }
}

fn label(field: &str) -> String {
    field.replace(['_', '.'], " ")
}
