//! Compile-time defaults, merged by build.rs from library values and the
//! optional `TETHER_CONFIG_RS` file.

include!(concat!(env!("OUT_DIR"), "/tether_merged_config.rs"));
