//! Ordered name→value maps attached to entities and to the agent itself.
//!
//! Entries are kept sorted by case-insensitive name so lookups are a
//! binary search.  Setting a `Null` value removes the entry; the map is
//! capacity-bounded at [`OPTION_MAX`](crate::OPTION_MAX) entries.

use crate::location::Location;
use crate::status::Status;
use crate::util::name_cmp;
use crate::value::{Value, ValueType};
use crate::{NAME_MAX, OPTION_MAX};

#[derive(Debug, Clone, PartialEq)]
struct OptionEntry {
    name: String,
    value: Value,
}

/// Ordered, capacity-bounded map of named values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionsMap {
    entries: Vec<OptionEntry>,
}

impl OptionsMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, name: &str) -> Result<usize, usize> {
        self.entries
            .binary_search_by(|entry| name_cmp(&entry.name, name))
    }

    /// Insert or replace `name`.  A `Null` value removes the entry
    /// instead; order is preserved in every case.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), Status> {
        if name.is_empty() {
            return Err(Status::BadParameter);
        }
        if name.len() > NAME_MAX {
            return Err(Status::OutOfRange);
        }
        let clearing = value.value_type() == ValueType::Null;
        match self.find(name) {
            Ok(idx) => {
                if clearing {
                    self.entries.remove(idx);
                } else {
                    self.entries[idx].value = value;
                }
            }
            Err(idx) => {
                if !clearing {
                    if self.entries.len() >= OPTION_MAX {
                        return Err(Status::Full);
                    }
                    self.entries.insert(
                        idx,
                        OptionEntry {
                            name: name.to_string(),
                            value,
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Remove `name`; equivalent to setting a `Null` value.
    pub fn clear(&mut self, name: &str) -> Result<(), Status> {
        self.set(name, Value::Null)
    }

    /// Look up `name` and read it as `ty`, converting when allowed.
    pub fn get(&self, name: &str, convert: bool, ty: ValueType) -> Result<Value, Status> {
        match self.find(name) {
            Ok(idx) => self.entries[idx].value.coerce(ty, convert),
            Err(_) => Err(Status::NotFound),
        }
    }

    /// The stored value itself, without coercion.
    pub fn get_value(&self, name: &str) -> Result<&Value, Status> {
        match self.find(name) {
            Ok(idx) => Ok(&self.entries[idx].value),
            Err(_) => Err(Status::NotFound),
        }
    }

    pub fn get_bool(&self, name: &str, convert: bool) -> Result<bool, Status> {
        match self.get(name, convert, ValueType::Bool)? {
            Value::Bool(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_i8(&self, name: &str, convert: bool) -> Result<i8, Status> {
        match self.get(name, convert, ValueType::Int8)? {
            Value::Int8(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_i16(&self, name: &str, convert: bool) -> Result<i16, Status> {
        match self.get(name, convert, ValueType::Int16)? {
            Value::Int16(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_i32(&self, name: &str, convert: bool) -> Result<i32, Status> {
        match self.get(name, convert, ValueType::Int32)? {
            Value::Int32(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_i64(&self, name: &str, convert: bool) -> Result<i64, Status> {
        match self.get(name, convert, ValueType::Int64)? {
            Value::Int64(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_u8(&self, name: &str, convert: bool) -> Result<u8, Status> {
        match self.get(name, convert, ValueType::UInt8)? {
            Value::UInt8(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_u16(&self, name: &str, convert: bool) -> Result<u16, Status> {
        match self.get(name, convert, ValueType::UInt16)? {
            Value::UInt16(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_u32(&self, name: &str, convert: bool) -> Result<u32, Status> {
        match self.get(name, convert, ValueType::UInt32)? {
            Value::UInt32(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_u64(&self, name: &str, convert: bool) -> Result<u64, Status> {
        match self.get(name, convert, ValueType::UInt64)? {
            Value::UInt64(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_f32(&self, name: &str, convert: bool) -> Result<f32, Status> {
        match self.get(name, convert, ValueType::Float32)? {
            Value::Float32(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_f64(&self, name: &str, convert: bool) -> Result<f64, Status> {
        match self.get(name, convert, ValueType::Float64)? {
            Value::Float64(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_string(&self, name: &str, convert: bool) -> Result<String, Status> {
        match self.get(name, convert, ValueType::String)? {
            Value::String(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_raw(&self, name: &str, convert: bool) -> Result<Vec<u8>, Status> {
        match self.get(name, convert, ValueType::Raw)? {
            Value::Raw(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn get_location(&self, name: &str) -> Result<Location, Status> {
        match self.get(name, false, ValueType::Location)? {
            Value::Location(v) => Ok(v),
            _ => Err(Status::BadRequest),
        }
    }

    pub fn set_raw(&mut self, name: &str, bytes: &[u8]) -> Result<(), Status> {
        self.set(name, Value::Raw(bytes.to_vec()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in storage (sorted) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), &entry.value))
    }

    #[cfg(test)]
    fn is_sorted(&self) -> bool {
        self.entries
            .windows(2)
            .all(|pair| name_cmp(&pair[0].name, &pair[1].name) == std::cmp::Ordering::Less)
    }
}
