//! Module parameters (`module_param`, `module_param_array`).
//!
//! A module declares its parameters with [`ParamDecl`]s. At load time the
//! host parses the `insmod` argument string against those declarations
//! with [`ModuleParams::parse`]; the module reads the resulting values from
//! its [`ModuleContext`](crate::ModuleContext).

use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use lkm_core::pr_warn;

use crate::error::DriverError;

bitflags::bitflags! {
    /// sysfs permission bits of a parameter.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamPerm: u16 {
        /// Owner may read.
        const S_IRUSR = 0o400;
        /// Owner may write.
        const S_IWUSR = 0o200;
        /// Group may read.
        const S_IRGRP = 0o040;
        /// Group may write.
        const S_IWGRP = 0o020;
        /// Others may read.
        const S_IROTH = 0o004;
        /// Others may write.
        const S_IWOTH = 0o002;
    }
}

/// Parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// `short`.
    Short,
    /// `int`.
    Int,
    /// `charp`.
    Charp,
    /// `int` array holding at most `max` elements.
    IntArray {
        /// Declared array length.
        max: usize,
    },
}

impl fmt::Display for ParamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short => f.write_str("short"),
            Self::Int => f.write_str("int"),
            Self::Charp => f.write_str("charp"),
            Self::IntArray { max } => write!(f, "array of int (max {max})"),
        }
    }
}

/// A parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// `short`.
    Short(i16),
    /// `int`.
    Int(i32),
    /// `charp`.
    Str(String),
    /// `int` array. `values` always has the declared length; `count` is the
    /// number of elements supplied on the command line.
    IntArray {
        /// Array elements.
        values: Vec<i32>,
        /// Elements supplied at load time.
        count: usize,
    },
}

impl ParamValue {
    /// Returns the type of this value.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Short(_) => ParamKind::Short,
            Self::Int(_) => ParamKind::Int,
            Self::Str(_) => ParamKind::Charp,
            Self::IntArray { values, .. } => ParamKind::IntArray { max: values.len() },
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Short(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::IntArray { values, .. } => {
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{v}")?;
                }
                Ok(())
            }
        }
    }
}

/// A declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamDecl {
    /// Parameter name.
    pub name: &'static str,
    /// Value used when the parameter is not given.
    pub default: ParamValue,
    /// sysfs permissions. Empty means not visible.
    pub perm: ParamPerm,
    /// `MODULE_PARM_DESC`.
    pub description: &'static str,
}

impl ParamDecl {
    /// A `short` parameter.
    pub fn short(name: &'static str, default: i16, perm: ParamPerm, description: &'static str) -> Self {
        Self {
            name,
            default: ParamValue::Short(default),
            perm,
            description,
        }
    }

    /// An `int` parameter.
    pub fn int(name: &'static str, default: i32, perm: ParamPerm, description: &'static str) -> Self {
        Self {
            name,
            default: ParamValue::Int(default),
            perm,
            description,
        }
    }

    /// A `charp` parameter.
    pub fn charp(
        name: &'static str,
        default: &str,
        perm: ParamPerm,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            default: ParamValue::Str(default.to_string()),
            perm,
            description,
        }
    }

    /// An `int` array parameter, as long as `defaults`.
    pub fn int_array(
        name: &'static str,
        defaults: &[i32],
        perm: ParamPerm,
        description: &'static str,
    ) -> Self {
        Self {
            name,
            default: ParamValue::IntArray {
                values: defaults.to_vec(),
                count: 0,
            },
            perm,
            description,
        }
    }

    /// Returns the parameter type.
    pub fn kind(&self) -> ParamKind {
        self.default.kind()
    }
}

/// A rejected parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
    /// The value does not parse as the declared type or is out of range.
    InvalidValue {
        /// Parameter name.
        name: String,
        /// The rejected text.
        value: String,
    },
    /// More array elements than declared.
    TooManyValues {
        /// Parameter name.
        name: String,
        /// Declared array length.
        max: usize,
    },
    /// `name` given without `=value`.
    MissingValue {
        /// Parameter name.
        name: String,
    },
}

impl fmt::Display for ParamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { name, value } => {
                write!(f, "invalid value `{value}` for parameter `{name}`")
            }
            Self::TooManyValues { name, max } => {
                write!(f, "parameter `{name}` takes at most {max} values")
            }
            Self::MissingValue { name } => write!(f, "parameter `{name}` needs a value"),
        }
    }
}

impl From<ParamError> for DriverError {
    fn from(_: ParamError) -> Self {
        Self::InvalidArgument
    }
}

/// Parses an integer the way `kstrtoint(s, 0, …)` does: optional sign,
/// `0x` for hex, a leading `0` for octal, decimal otherwise.
fn parse_int(text: &str) -> Option<i64> {
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (radix, digits) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    if digits.is_empty() || digits.starts_with(['+', '-']) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Splits an argument string at unquoted whitespace, removing the quotes.
fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quoted = false;
    for c in args.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_token = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_token {
                    out.push(core::mem::take(&mut current));
                    in_token = false;
                }
            }
            c => {
                current.push(c);
                in_token = true;
            }
        }
    }
    if in_token {
        out.push(current);
    }
    out
}

/// Parameter values of one loaded module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleParams {
    decls: Vec<ParamDecl>,
    values: Vec<ParamValue>,
}

impl ModuleParams {
    /// All parameters at their defaults.
    pub fn new(decls: Vec<ParamDecl>) -> Self {
        let values = decls.iter().map(|d| d.default.clone()).collect();
        Self { decls, values }
    }

    /// Parses an `insmod` argument string such as
    /// `short_param=3 array_param=13,13 str_param="hello world"`.
    ///
    /// Unknown names are logged and ignored.
    ///
    /// # Errors
    ///
    /// The first [`ParamError`] encountered.
    pub fn parse(decls: Vec<ParamDecl>, args: &str) -> Result<Self, ParamError> {
        let mut params = Self::new(decls);
        for token in split_args(args) {
            let Some((name, value)) = token.split_once('=') else {
                if params.index(&token).is_some() {
                    return Err(ParamError::MissingValue { name: token });
                }
                pr_warn!("Unknown parameter `{token}' ignored");
                continue;
            };
            if !params.set(name, value)? {
                pr_warn!("Unknown parameter `{name}' ignored");
            }
        }
        Ok(params)
    }

    fn index(&self, name: &str) -> Option<usize> {
        self.decls.iter().position(|d| d.name == name)
    }

    /// Sets one parameter from its text form.
    ///
    /// Returns `false` if no parameter is called `name`.
    ///
    /// # Errors
    ///
    /// [`ParamError::InvalidValue`] or [`ParamError::TooManyValues`].
    pub fn set(&mut self, name: &str, text: &str) -> Result<bool, ParamError> {
        let Some(idx) = self.index(name) else {
            return Ok(false);
        };
        let invalid = || ParamError::InvalidValue {
            name: name.to_string(),
            value: text.to_string(),
        };
        let value = match self.decls[idx].kind() {
            ParamKind::Short => ParamValue::Short(
                parse_int(text)
                    .and_then(|v| i16::try_from(v).ok())
                    .ok_or_else(invalid)?,
            ),
            ParamKind::Int => ParamValue::Int(
                parse_int(text)
                    .and_then(|v| i32::try_from(v).ok())
                    .ok_or_else(invalid)?,
            ),
            ParamKind::Charp => ParamValue::Str(text.to_string()),
            ParamKind::IntArray { max } => {
                let items: Vec<&str> = text.split(',').collect();
                if items.len() > max {
                    return Err(ParamError::TooManyValues {
                        name: name.to_string(),
                        max,
                    });
                }
                let mut values = match &self.values[idx] {
                    ParamValue::IntArray { values, .. } => values.clone(),
                    _ => vec![0; max],
                };
                for (slot, item) in values.iter_mut().zip(&items) {
                    *slot = parse_int(item)
                        .and_then(|v| i32::try_from(v).ok())
                        .ok_or_else(invalid)?;
                }
                ParamValue::IntArray {
                    values,
                    count: items.len(),
                }
            }
        };
        self.values[idx] = value;
        Ok(true)
    }

    /// Returns the value of `name`.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.index(name).map(|i| &self.values[i])
    }

    /// Returns a `short` parameter.
    pub fn short(&self, name: &str) -> Option<i16> {
        match self.get(name)? {
            ParamValue::Short(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns an `int` parameter.
    pub fn int(&self, name: &str) -> Option<i32> {
        match self.get(name)? {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a `charp` parameter.
    pub fn str(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns an array parameter and the number of supplied elements.
    pub fn int_array(&self, name: &str) -> Option<(&[i32], usize)> {
        match self.get(name)? {
            ParamValue::IntArray { values, count } => Some((values, *count)),
            _ => None,
        }
    }

    /// Declarations with their current values.
    pub fn iter(&self) -> impl Iterator<Item = (&ParamDecl, &ParamValue)> {
        self.decls.iter().zip(&self.values)
    }

    /// Parameters with non-empty permissions, as listed under
    /// `/sys/module/<name>/parameters`.
    pub fn visible(&self) -> impl Iterator<Item = (&ParamDecl, &ParamValue)> {
        self.iter().filter(|(d, _)| !d.perm.is_empty())
    }

    /// Returns the declarations.
    pub fn decls(&self) -> &[ParamDecl] {
        &self.decls
    }
}
