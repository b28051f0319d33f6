//! A set of constants used by the library.

/// Gateway version of the Voice API which this library encodes.
pub const GATEWAY_VERSION: u8 = 4;
