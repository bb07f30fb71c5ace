//! Build script for tether-runtime
//!
//! Merges compile-time configuration:
//! 1. Start with library defaults
//! 2. If TETHER_CONFIG_RS is set, read `pub const NAME: TYPE = VALUE;` lines
//!    from that file and let them override the defaults
//! 3. Write OUT_DIR/tether_merged_config.rs
//!
//! Users only list the values they want to change.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

struct ConfigParam {
    name: &'static str,
    rust_type: &'static str,
    default_value: &'static str,
}

const CONFIG_PARAMS: &[ConfigParam] = &[
    ConfigParam {
        name: "STACK_SIZE",
        rust_type: "usize",
        default_value: "2 * 1024 * 1024", // 2MB, the usual pthread default
    },
    ConfigParam {
        name: "THREAD_NAME_PREFIX",
        rust_type: "&str",
        default_value: "\"tether\"",
    },
    ConfigParam {
        name: "EMBEDDED",
        rust_type: "bool",
        default_value: "false",
    },
    ConfigParam {
        name: "DEBUG_LOGGING",
        rust_type: "bool",
        default_value: "false",
    },
];

fn main() {
    let out_dir = env::var("OUT_DIR").expect("OUT_DIR not set");
    let dest_path = Path::new(&out_dir).join("tether_merged_config.rs");

    let mut config: HashMap<&str, String> = CONFIG_PARAMS
        .iter()
        .map(|p| (p.name, p.default_value.to_string()))
        .collect();

    if let Ok(user_path) = env::var("TETHER_CONFIG_RS") {
        println!("cargo:rerun-if-changed={}", user_path);

        match fs::read_to_string(&user_path) {
            Ok(content) => {
                merge_user_config(&content, &mut config);
                println!("cargo:warning=Using custom config: {}", user_path);
            }
            Err(e) => {
                println!(
                    "cargo:warning=Failed to read TETHER_CONFIG_RS ({}): {}",
                    user_path, e
                );
            }
        }
    }

    println!("cargo:rerun-if-env-changed=TETHER_CONFIG_RS");

    fs::write(&dest_path, render(&config)).expect("Failed to write merged config");
}

/// Override known parameters from the user's file; unknown names warn
fn merge_user_config(content: &str, config: &mut HashMap<&str, String>) {
    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with("//") {
            continue;
        }
        let Some((name, value)) = parse_const_line(line) else {
            continue;
        };
        match CONFIG_PARAMS.iter().find(|p| p.name == name) {
            Some(param) => {
                config.insert(param.name, value);
            }
            None => println!("cargo:warning=Unknown config parameter: {}", name),
        }
    }
}

/// `pub const NAME: TYPE = VALUE;` -> (NAME, VALUE)
fn parse_const_line(line: &str) -> Option<(String, String)> {
    let rest = line.strip_prefix("pub const ")?.trim();

    let colon_pos = rest.find(':')?;
    let name = rest[..colon_pos].trim().to_string();

    let eq_pos = rest.find('=')?;
    let semi_pos = rest.rfind(';').unwrap_or(rest.len());
    let value = rest[eq_pos + 1..semi_pos].trim().to_string();

    Some((name, value))
}

fn render(config: &HashMap<&str, String>) -> String {
    let mut output = String::from("// Auto-generated by build.rs - do not edit\n\n");
    for param in CONFIG_PARAMS {
        let value = &config[param.name];
        output.push_str(&format!(
            "pub const {}: {} = {};\n",
            param.name, param.rust_type, value
        ));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_const_line() {
        assert_eq!(
            parse_const_line("pub const EMBEDDED: bool = true;"),
            Some(("EMBEDDED".into(), "true".into()))
        );
        assert_eq!(
            parse_const_line("pub const STACK_SIZE: usize = 512 * 1024;"),
            Some(("STACK_SIZE".into(), "512 * 1024".into()))
        );
        assert_eq!(parse_const_line("const HIDDEN: u8 = 1;"), None);
    }

    #[test]
    fn test_merge_user_config() {
        let mut config: HashMap<&str, String> = HashMap::new();
        config.insert("STACK_SIZE", "1".into());

        merge_user_config(
            r#"
            // Custom config
            pub const STACK_SIZE: usize = 65536;
            pub const THREAD_NAME_PREFIX: &str = "svc";
            "#,
            &mut config,
        );

        assert_eq!(config.get("STACK_SIZE"), Some(&"65536".to_string()));
        assert_eq!(config.get("THREAD_NAME_PREFIX"), Some(&"\"svc\"".to_string()));
    }
}
