//! Helper macros for PDU encoding and decoding.
//!
//! Exported and available to every Spyglass crate.

/// Returns a "not enough bytes" error when the buffer holds fewer bytes than
/// expected. Usable on both read and write cursors.
#[macro_export]
macro_rules! ensure_size {
    (ctx: $ctx:expr, in: $buf:ident, size: $expected:expr) => {{
        let received = $buf.len();
        let expected = $expected;
        if !(received >= expected) {
            return Err($crate::not_enough_bytes_err($ctx, received, expected));
        }
    }};
    (in: $buf:ident, size: $expected:expr) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: $expected)
    }};
}

/// Shorthand for `ensure_size!` against `Self::FIXED_PART_SIZE`.
#[macro_export]
macro_rules! ensure_fixed_part_size {
    (in: $buf:ident) => {{
        $crate::ensure_size!(ctx: Self::NAME, in: $buf, size: Self::FIXED_PART_SIZE)
    }};
}

#[macro_export]
macro_rules! invalid_field_err {
    ($ctx:expr, $field:expr, $reason:expr) => {{
        $crate::invalid_field_err($ctx, $field, $reason)
    }};
    ($field:expr, $reason:expr) => {{
        $crate::invalid_field_err(Self::NAME, $field, $reason)
    }};
}

#[macro_export]
macro_rules! unexpected_message_type_err {
    ($ctx:expr, $got:expr) => {{
        $crate::unexpected_message_type_err($ctx, $got)
    }};
    ($got:expr) => {{
        $crate::unexpected_message_type_err(Self::NAME, $got)
    }};
}

#[macro_export]
macro_rules! unsupported_version_err {
    ($ctx:expr, $got:expr) => {{
        $crate::unsupported_version_err($ctx, $got)
    }};
}

#[macro_export]
macro_rules! other_err {
    ($ctx:expr, source: $source:expr) => {{
        $crate::other_err_with_source($ctx, "", $source)
    }};
    ($ctx:expr, $description:expr) => {{
        $crate::other_err($ctx, $description)
    }};
}

/// Fallible integer narrowing reported as an invalid-field error.
#[macro_export]
macro_rules! cast_length {
    ($ctx:expr, $field:expr, $len:expr) => {{
        $len.try_into()
            .map_err(|_| $crate::invalid_field_err($ctx, $field, "too many elements"))
    }};
    ($field:expr, $len:expr) => {{
        $crate::cast_length!(Self::NAME, $field, $len)
    }};
}

/// Moves the read cursor over padding bytes.
#[macro_export]
macro_rules! read_padding {
    ($src:ident, $n:expr) => {{
        $src.advance($n)
    }};
}

/// Writes `$n` zero bytes.
#[macro_export]
macro_rules! write_padding {
    ($dst:ident, $n:expr) => {{
        $crate::write_padding($dst, $n)
    }};
}

/// Asserts that the traits support dynamic dispatch.
#[macro_export]
macro_rules! assert_obj_safe {
    ($($xs:path),+ $(,)?) => {
        $(const _: Option<&dyn $xs> = None;)+
    };
}

/// Asserts that the type implements _all_ of the given traits.
#[macro_export]
macro_rules! assert_impl {
    ($type:ty: $($trait:path),+ $(,)?) => {
        const _: fn() = || {
            fn assert_impl_all<T: ?Sized $(+ $trait)+>() {}
            assert_impl_all::<$type>();
        };
    };
}
