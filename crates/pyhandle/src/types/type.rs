use strum::{Display, EnumIter, EnumString, IntoStaticStr};

/// Runtime type tag carried by every heap object.
///
/// The string form is the Python-visible class name, so `Type::FrozenSet`
/// displays as `frozenset` and parses back from it.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
    serde::Serialize,
    serde::Deserialize,
)]
#[strum(serialize_all = "lowercase")]
pub enum Type {
    #[strum(serialize = "NoneType")]
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    Tuple,
    List,
    Set,
    FrozenSet,
    Type,
    #[strum(serialize = "tuple_iterator")]
    TupleIterator,
    #[strum(serialize = "list_iterator")]
    ListIterator,
    #[strum(serialize = "str_iterator")]
    StrIterator,
    #[strum(serialize = "set_iterator")]
    SetIterator,
}

impl Type {
    /// Returns true for `set` and `frozenset`.
    #[must_use]
    pub fn is_any_set(self) -> bool {
        matches!(self, Self::Set | Self::FrozenSet)
    }

    /// Returns true for the numeric tower (`bool`, `int`, `float`).
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Bool | Self::Int | Self::Float)
    }

    /// Returns true for the iterator types produced by `iter()`.
    #[must_use]
    pub fn is_iterator(self) -> bool {
        matches!(
            self,
            Self::TupleIterator | Self::ListIterator | Self::StrIterator | Self::SetIterator
        )
    }

    /// Returns true if instances of this type have a hash.
    ///
    /// Mutable containers are unhashable, matching Python.
    #[must_use]
    pub fn is_hashable(self) -> bool {
        !matches!(self, Self::List | Self::Set)
    }

    /// Public attribute names reported by `dir()` for instances of this type.
    #[must_use]
    pub(crate) fn attribute_names(self) -> &'static [&'static str] {
        match self {
            Self::NoneType => &[],
            Self::Bool | Self::Int => &[
                "as_integer_ratio",
                "bit_count",
                "bit_length",
                "conjugate",
                "denominator",
                "from_bytes",
                "imag",
                "numerator",
                "real",
                "to_bytes",
            ],
            Self::Float => &[
                "as_integer_ratio",
                "conjugate",
                "fromhex",
                "hex",
                "imag",
                "is_integer",
                "real",
            ],
            Self::Str => &[
                "capitalize",
                "count",
                "encode",
                "endswith",
                "find",
                "format",
                "join",
                "lower",
                "replace",
                "split",
                "startswith",
                "strip",
                "upper",
            ],
            Self::Tuple => &["count", "index"],
            Self::List => &[
                "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse", "sort",
            ],
            Self::Set => &[
                "add",
                "clear",
                "copy",
                "difference",
                "difference_update",
                "discard",
                "intersection",
                "intersection_update",
                "isdisjoint",
                "issubset",
                "issuperset",
                "pop",
                "remove",
                "symmetric_difference",
                "symmetric_difference_update",
                "union",
                "update",
            ],
            Self::FrozenSet => &[
                "copy",
                "difference",
                "intersection",
                "isdisjoint",
                "issubset",
                "issuperset",
                "symmetric_difference",
                "union",
            ],
            Self::Type => &["mro"],
            Self::TupleIterator | Self::ListIterator | Self::StrIterator | Self::SetIterator => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use pretty_assertions::assert_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn names_round_trip() {
        for ty in Type::iter() {
            assert_eq!(Type::from_str(&ty.to_string()), Ok(ty));
        }
        assert_eq!(Type::FrozenSet.to_string(), "frozenset");
        assert_eq!(Type::NoneType.to_string(), "NoneType");
    }

    #[test]
    fn classification() {
        assert!(Type::Bool.is_numeric());
        assert!(!Type::Str.is_numeric());
        assert!(Type::FrozenSet.is_hashable());
        assert!(!Type::Set.is_hashable());
        assert!(!Type::List.is_hashable());
        assert!(Type::SetIterator.is_iterator());
        assert!(!Type::Set.is_iterator());
    }
}
