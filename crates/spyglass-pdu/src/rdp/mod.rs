//! RDP-layer PDUs carried on the I/O channel: security headers, the security
//! exchange, client info, licensing and the slow-path share headers.

pub mod client_info;
pub mod headers;
pub mod license;
pub mod vc;

pub use self::client_info::ClientInfo;
pub use self::headers::{
    SecurityExchangePdu, SecurityHeader, SecurityHeaderFlags, ShareControlHeader, ShareControlPduType,
    ShareDataHeader, ShareDataPduType, BASIC_SECURITY_HEADER_SIZE,
};
pub use self::license::{LicenseHeader, LicensingErrorMessage, PreambleType};
