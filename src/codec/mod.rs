//! Codec module - typed values and their binary encoding.
//!
//! This module provides the value model carried by messages:
//!
//! - [`Value`] / [`ValueType`] - typed values and their declared types
//! - [`Decimal`] - exact decimal numbers
//! - [`Schema`] - ordered, typed field declarations with exact-match checking
//! - [`encode`] / [`decode`] - the binary encoding of a single value
//!
//! # Example
//!
//! ```
//! use ampwire::codec::{decode, encode, Value, ValueType};
//!
//! let ty = ValueType::list(ValueType::Integer);
//! let value = Value::List(vec![4.into(), 5.into(), 6.into()]);
//!
//! let bytes = encode(&value, &ty).unwrap();
//! assert_eq!(decode(&bytes, &ty).unwrap(), value);
//! ```

mod binary;
mod decimal;
mod schema;
mod value;

pub(crate) use binary::put_name;
pub use binary::{decode, encode};
pub use decimal::Decimal;
pub use schema::{EncodedField, FieldDef, Schema};
pub use value::{tags, Fields, Value, ValueType};
