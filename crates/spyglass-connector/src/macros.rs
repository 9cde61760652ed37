//! Error helper macros shared by the connection sequences.

#[macro_export]
macro_rules! general_err {
    ( $context:expr $(,)? ) => {{
        <$crate::ConnectorError as $crate::ConnectorErrorExt>::general($context)
    }};
}

#[macro_export]
macro_rules! reason_err {
    ( $context:expr, $($arg:tt)* ) => {{
        <$crate::ConnectorError as $crate::ConnectorErrorExt>::reason($context, format!($($arg)*))
    }};
}

#[macro_export]
macro_rules! custom_err {
    ( $context:expr, $source:expr $(,)? ) => {{
        <$crate::ConnectorError as $crate::ConnectorErrorExt>::custom($context, $source)
    }};
}
