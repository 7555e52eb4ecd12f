use nvframe_core::{FieldSpec, FrameworkConfig, SchemaRegistry, Value, fields};
use std::fs;
use tempfile::TempDir;

fn net_schema(registry: &SchemaRegistry) {
    registry
        .define(
            "net",
            fields([
                ("host", FieldSpec::string().with_default("localhost")),
                ("port", FieldSpec::number().with_default(3000)),
            ]),
        )
        .unwrap();
}

#[test]
fn test_net_end_to_end() {
    let registry = SchemaRegistry::new();
    net_schema(&registry);

    let merged = registry.merge("net", &Value::from_pairs([("port", 8080)]));
    assert_eq!(
        merged,
        Value::from_pairs([("host", Value::from("localhost")), ("port", Value::from(8080))])
    );

    let errors = registry
        .validate("net", &Value::from_pairs([("port", "x")]))
        .unwrap_err();
    assert!(errors.message("port").unwrap().contains("type mismatch"));
}

#[test]
fn test_merge_precedence() {
    let registry = SchemaRegistry::new();
    registry
        .define("f", fields([("f", FieldSpec::string().with_default("A"))]))
        .unwrap();

    let user = registry.merge("f", &Value::from_pairs([("f", "B")]));
    assert_eq!(user.get("f"), Some(&Value::from("B")));

    let defaults = registry.merge("f", &Value::object());
    assert_eq!(defaults.get("f"), Some(&Value::from("A")));
}

#[test]
fn test_defaults_satisfy_validation() {
    let registry = SchemaRegistry::new();
    registry
        .define(
            "editor",
            fields([
                ("theme", FieldSpec::string().required().with_default("tokyonight")),
                ("number", FieldSpec::boolean().required().with_default(true)),
                ("tabstop", FieldSpec::number().required().with_default(4)),
                (
                    "ensure_installed",
                    FieldSpec::array(FieldSpec::string())
                        .required()
                        .with_default(vec!["lua", "rust"]),
                ),
                (
                    "diagnostics",
                    FieldSpec::table().required().with_default(Value::object()).with_fields(
                        fields([("virtual_text", FieldSpec::boolean().with_default(false))]),
                    ),
                ),
                ("on_attach", FieldSpec::any().with_default("noop")),
            ]),
        )
        .unwrap();

    let filled = registry.apply_defaults("editor", &Value::object());
    assert!(registry.validate("editor", &filled).is_ok());
    assert_eq!(
        filled.get_path("diagnostics.virtual_text"),
        Some(&Value::from(false))
    );
}

#[test]
fn test_all_missing_required_fields_reported() {
    let registry = SchemaRegistry::new();
    registry
        .define(
            "dap",
            fields([
                ("adapter", FieldSpec::string().required()),
                ("port", FieldSpec::number()),
                ("command", FieldSpec::string().required()),
            ]),
        )
        .unwrap();

    let errors = registry.validate("dap", &Value::object()).unwrap_err();
    let mut keys: Vec<&str> = errors.keys().collect();
    keys.sort();
    assert_eq!(keys, vec!["adapter", "command"]);
}

#[test]
fn test_merge_keeps_inputs_untouched() {
    let registry = SchemaRegistry::new();
    registry
        .define(
            "git",
            fields([(
                "signs",
                FieldSpec::table().with_fields(fields([
                    ("add", FieldSpec::string().with_default("+")),
                    ("delete", FieldSpec::string().with_default("_")),
                ])),
            )]),
        )
        .unwrap();

    let user = Value::from_pairs([("signs", Value::from_pairs([("add", "│")]))]);
    let merged = registry.merge("git", &user);
    assert_eq!(merged.get_path("signs.add"), Some(&Value::from("│")));
    assert_eq!(merged.get_path("signs.delete"), Some(&Value::from("_")));
    assert!(user.get_path("signs.delete").is_none());

    let again = registry.merge("git", &Value::object());
    assert_eq!(again.get_path("signs.add"), Some(&Value::from("+")));
}

#[test]
fn test_errors_render_field_by_field() {
    let registry = SchemaRegistry::new();
    registry
        .define(
            "fmt",
            fields([
                ("name", FieldSpec::string().required()),
                (
                    "opts",
                    FieldSpec::table().with_fields(fields([("width", FieldSpec::number())])),
                ),
            ]),
        )
        .unwrap();

    let config = Value::from_pairs([("opts", Value::from_pairs([("width", "wide")]))]);
    let rendered = registry.validate("fmt", &config).unwrap_err().to_string();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("name: required"));
    assert!(lines[1].starts_with("opts.width: type mismatch"));
}

#[test]
fn test_framework_config_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nvframe.toml");
    fs::write(&path, "entry = \"core\"\nlog_level = \"debug\"\n").unwrap();

    let config = FrameworkConfig::load(&path).unwrap();
    assert_eq!(config.entry, "core");
    assert_eq!(config.log_level, "debug");
    assert!(config.load_eager);

    assert!(FrameworkConfig::load(&temp.path().join("missing.toml")).is_err());
}
