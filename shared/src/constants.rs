//! Well-known values of the PS3 peripheral family.

/// Remote name reported by the SIXAXIS / DualShock 3.
pub const SIXAXIS_NAME: &str = "PLAYSTATION(R)3 Controller";
/// Remote name reported by the Move navigation controller.
pub const NAVIGATION_NAME: &str = "Navigation Controller";
/// Remote name reported by the Move motion controller.
pub const MOTION_NAME: &str = "Motion Controller";
/// Remote name reported by the DualShock 4 (wireless controller profile).
pub const WIRELESS_NAME: &str = "Wireless Controller";

/// L2CAP MTU the stack proposes when the remote side leaves it unset.
pub const L2CAP_DEFAULT_MTU: u16 = 672;
/// "Infinite" flush timeout as encoded on the wire.
pub const L2CAP_FLUSH_INFINITE: u16 = 0xFFFF;
