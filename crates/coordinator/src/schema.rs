//! Declarative-ish argument decoding for tool handlers.
//!
//! Every accessor names the field in its error so validation failures are
//! self-explanatory, and everything runs before a handler takes a lock.

use coord_core::CoordError;
use serde_json::Value;

/// Borrowed view over a tool call's `arguments` object.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    value: &'a Value,
}

impl<'a> Args<'a> {
    pub fn new(value: &'a Value) -> Result<Self, CoordError> {
        if value.is_object() || value.is_null() {
            Ok(Self { value })
        } else {
            Err(CoordError::validation(
                "arguments",
                "must be a JSON object",
            ))
        }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.value.get(field).filter(|v| !v.is_null())
    }

    pub fn require_str(&self, field: &str) -> Result<&'a str, CoordError> {
        self.get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| CoordError::validation(field, "required string missing"))
    }

    /// Required string that must also pass the safe-identifier check.
    pub fn require_ident(&self, field: &str) -> Result<&'a str, CoordError> {
        let value = self.require_str(field)?;
        coord_core::ident::validate_ident(field, value)?;
        Ok(value)
    }

    pub fn opt_str(&self, field: &str) -> Result<Option<&'a str>, CoordError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_str()
                .map(Some)
                .ok_or_else(|| CoordError::validation(field, "must be a string")),
        }
    }

    pub fn opt_ident(&self, field: &str) -> Result<Option<&'a str>, CoordError> {
        match self.opt_str(field)? {
            None => Ok(None),
            Some(value) => {
                coord_core::ident::validate_ident(field, value)?;
                Ok(Some(value))
            }
        }
    }

    pub fn opt_bool(&self, field: &str, default: bool) -> Result<bool, CoordError> {
        match self.get(field) {
            None => Ok(default),
            Some(value) => value
                .as_bool()
                .ok_or_else(|| CoordError::validation(field, "must be a boolean")),
        }
    }

    pub fn opt_u64(&self, field: &str) -> Result<Option<u64>, CoordError> {
        match self.get(field) {
            None => Ok(None),
            Some(value) => value
                .as_u64()
                .map(Some)
                .ok_or_else(|| CoordError::validation(field, "must be a non-negative integer")),
        }
    }

    pub fn opt_usize(&self, field: &str) -> Result<Option<usize>, CoordError> {
        Ok(self.opt_u64(field)?.map(|v| v as usize))
    }

    pub fn opt_u32(&self, field: &str) -> Result<Option<u32>, CoordError> {
        match self.opt_u64(field)? {
            None => Ok(None),
            Some(value) => u32::try_from(value)
                .map(Some)
                .map_err(|_| CoordError::validation(field, "out of range")),
        }
    }

    /// Optional enum decoded via the type's `parse`; unknown values name
    /// the field and the bad token.
    pub fn opt_enum<T>(
        &self,
        field: &str,
        parse: fn(&str) -> Option<T>,
    ) -> Result<Option<T>, CoordError> {
        match self.opt_str(field)? {
            None => Ok(None),
            Some(raw) => parse(raw)
                .map(Some)
                .ok_or_else(|| CoordError::validation(field, format!("unknown value '{raw}'"))),
        }
    }

    pub fn opt_str_vec(&self, field: &str) -> Result<Vec<String>, CoordError> {
        match self.get(field) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        CoordError::validation(field, "must be an array of strings")
                    })
                })
                .collect(),
            Some(_) => Err(CoordError::validation(field, "must be an array of strings")),
        }
    }

    pub fn opt_object(
        &self,
        field: &str,
    ) -> Result<Option<serde_json::Map<String, Value>>, CoordError> {
        match self.value.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Object(map)) => Ok(Some(map.clone())),
            Some(_) => Err(CoordError::validation(field, "must be an object")),
        }
    }

    pub fn opt_array(&self, field: &str) -> Result<Option<&'a Vec<Value>>, CoordError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Array(items)) => Ok(Some(items)),
            Some(_) => Err(CoordError::validation(field, "must be an array")),
        }
    }
}
