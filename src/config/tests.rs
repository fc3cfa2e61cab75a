use super::*;

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.public_port = Some(4000);
    raw.logging.level = Some("info".to_string());

    let overrides = ServeOverrides {
        public_port: Some(4321),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
}

#[test]
fn defaults_are_valid() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.public_addr.port(), 3000);
    assert_eq!(settings.server.admin_addr.port(), 3001);
    assert_eq!(settings.site.base_url, "http://127.0.0.1:3000/");
    assert_eq!(settings.upstream.url.as_str(), "http://127.0.0.1:8080/");
    assert!(settings.cache.enabled);
    assert!(!settings.cache.minify_enabled);
    assert_eq!(settings.cache.max_body_bytes, 8 * 1024 * 1024);
    assert_eq!(settings.cache.root, PathBuf::from("cache/pagestash"));
    assert_eq!(settings.privilege.admin_path_prefixes, vec!["/admin"]);
    assert_eq!(settings.privilege.session_cookie_prefixes, vec!["session"]);
    assert_eq!(settings.admin.settings_path, "/settings");
    assert!(settings.minify.css_command.is_none());
}

#[test]
fn site_base_url_gains_trailing_slash() {
    let mut raw = RawSettings::default();
    raw.site.base_url = Some("https://blog.example/en".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.site.base_url, "https://blog.example/en/");
}

#[test]
fn asset_base_url_defaults_to_site_base_url() {
    let mut raw = RawSettings::default();
    raw.site.base_url = Some("https://blog.example".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.asset_base_url, "https://blog.example/");
}

#[test]
fn asset_base_url_can_point_elsewhere() {
    let mut raw = RawSettings::default();
    raw.cache.asset_base_url = Some("https://cdn.example/static".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.asset_base_url, "https://cdn.example/static/");
}

#[test]
fn rejects_non_http_upstream() {
    let mut raw = RawSettings::default();
    raw.upstream.url = Some("ftp://origin.example".to_string());

    let err = Settings::from_raw(raw).expect_err("ftp upstream must be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "upstream.url",
            ..
        }
    ));
}

#[test]
fn rejects_zero_body_limit() {
    let mut raw = RawSettings::default();
    raw.cache.max_body_bytes = Some(0);

    let err = Settings::from_raw(raw).expect_err("zero limit must be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "cache.max_body_bytes",
            ..
        }
    ));
}

#[test]
fn rejects_blank_minify_command() {
    let mut raw = RawSettings::default();
    raw.minify.js_command = Some("   ".to_string());

    let err = Settings::from_raw(raw).expect_err("blank command must be rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "minify.js_command",
            ..
        }
    ));
}

#[test]
fn minify_commands_are_split_into_program_and_args() {
    let mut raw = RawSettings::default();
    raw.minify.js_command = Some("esbuild --minify --loader=js".to_string());

    let settings = Settings::from_raw(raw).expect("valid settings");
    let command = settings.minify.js_command.expect("js command");
    assert_eq!(command.program, PathBuf::from("esbuild"));
    assert_eq!(command.args, vec!["--minify", "--loader=js"]);
}

#[test]
fn settings_path_must_be_absolute() {
    let mut raw = RawSettings::default();
    raw.admin.settings_path = Some("settings".to_string());

    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = ServeOverrides {
        log_json: Some(true),
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["pagestash"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_clear_arguments() {
    let args = CliArgs::parse_from(["pagestash", "clear", "--all", "--cache-root", "/tmp/c"]);

    match args.command.expect("clear command") {
        Command::Clear(clear) => {
            assert!(clear.all);
            assert_eq!(
                clear.cache.cache_root.as_deref(),
                Some(std::path::Path::new("/tmp/c"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "pagestash",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--minify",
        "true",
        "--upstream-url",
        "http://origin:9000",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.minify_enabled, Some(true));
            assert_eq!(
                serve.overrides.upstream_url.as_deref(),
                Some("http://origin:9000")
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn cache_root_override_applies_to_clear() {
    let mut raw = RawSettings::default();
    raw.apply_cache_root_override(&CacheRootOverride {
        cache_root: Some(PathBuf::from("/var/cache/site")),
    });

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.cache.root, PathBuf::from("/var/cache/site"));
}
