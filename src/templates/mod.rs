use minijinja::{AutoEscape, Environment, Value};
use once_cell::sync::Lazy;

pub const BRD_TEMPLATE: &str = "brd.md";
pub const DIAGRAM_TEMPLATE: &str = "process.svg";

static BRD_SOURCE: &str = include_str!("brd.md.j2");
static DIAGRAM_SOURCE: &str = include_str!("process.svg.j2");

static JINJA_ENV: Lazy<Environment<'static>> = Lazy::new(|| {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_auto_escape_callback(|name| {
        if name.ends_with(".svg") {
            AutoEscape::Html
        } else {
            AutoEscape::None
        }
    });
    for (name, source) in [(BRD_TEMPLATE, BRD_SOURCE), (DIAGRAM_TEMPLATE, DIAGRAM_SOURCE)] {
        if let Err(e) = env.add_template(name, source) {
            log::error!("Failed to load built-in template {}: {}", name, e);
        }
    }
    env
});

pub fn render(name: &str, context: Value) -> Result<String, minijinja::Error> {
    JINJA_ENV.get_template(name)?.render(context)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_load() {
        assert!(JINJA_ENV.get_template(BRD_TEMPLATE).is_ok());
        assert!(JINJA_ENV.get_template(DIAGRAM_TEMPLATE).is_ok());
    }

    #[test]
    fn test_unknown_template_is_an_error() {
        assert!(render("missing.txt", Value::from(())).is_err());
    }
}
