//! `declutter config` -- display resolved configuration.
//!
//! ```text
//! declutter config show
//! declutter config show --config ./declutter.json
//! ```

use declutter_types::config::Config;

/// Print the resolved configuration as formatted JSON.
pub fn config_show(config: &Config) -> anyhow::Result<()> {
    println!("{}", render(config)?);
    Ok(())
}

fn render(config: &Config) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(config)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_has_every_section() {
        let json: serde_json::Value =
            serde_json::from_str(&render(&Config::default()).unwrap()).unwrap();
        let sections = [
            "pipeline",
            "storage",
            "routing",
            "detector",
            "classifier",
            "marketplace",
            "api",
        ];
        for section in sections {
            assert!(json.get(section).is_some(), "missing {section}");
        }
        assert_eq!(json["routing"]["detector"], "detector");
    }
}
