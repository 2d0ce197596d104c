use super::*;
use crate::core::config::data::DEFAULT_MODEL;
use std::fs;
use tempfile::TempDir;

mod test_helpers {
    use super::*;

    pub(super) fn parse_args(argv: &[&str]) -> Args {
        Args::try_parse_from(argv)
            .unwrap_or_else(|err| panic!("argv={argv:?} should parse successfully: {err}"))
    }

    pub(super) fn assert_optional_flag_value(
        actual: Option<&str>,
        expected: Option<&str>,
        flag_name: &str,
        argv: &[&str],
    ) {
        assert_eq!(
            actual, expected,
            "unexpected value for {flag_name} when parsing argv={argv:?}"
        );
    }
}

use test_helpers::{assert_optional_flag_value, parse_args};

#[test]
fn test_model_flag_parsing() {
    let cases: [(&[&str], Option<&str>); 3] = [
        (&["deepchat", "-m", "deepseek-reasoner"], Some("deepseek-reasoner")),
        (&["deepchat", "--model", "deepseek-chat"], Some("deepseek-chat")),
        (&["deepchat"], None),
    ];

    for (argv, expected_model) in cases {
        let args = parse_args(argv);
        assert_optional_flag_value(args.model.as_deref(), expected_model, "model", argv);
    }
}

#[test]
fn test_no_subcommand_defaults_to_chat() {
    let args = parse_args(&["deepchat"]);
    assert!(args.command.is_none());

    let args = parse_args(&["deepchat", "chat", "--resume", "conversation_20240101_120000"]);
    match args.command {
        Some(Commands::Chat { resume }) => {
            assert_eq!(resume.as_deref(), Some("conversation_20240101_120000"));
        }
        _ => panic!("expected chat subcommand"),
    }
}

#[test]
fn test_global_flags_after_subcommand() {
    let args = parse_args(&[
        "deepchat",
        "chat",
        "--profile",
        "me.json",
        "--data-dir",
        "/tmp/chat",
        "--log",
        "chat.log",
        "--config",
        "custom.toml",
    ]);

    assert_eq!(args.profile, Some(PathBuf::from("me.json")));
    assert_eq!(args.data_dir, Some(PathBuf::from("/tmp/chat")));
    assert_eq!(args.log, Some(PathBuf::from("chat.log")));
    assert_eq!(args.config, Some(PathBuf::from("custom.toml")));

    let overrides = args.overrides();
    assert_eq!(overrides.profile_path, Some(PathBuf::from("me.json")));
    assert_eq!(overrides.data_dir, Some(PathBuf::from("/tmp/chat")));
    assert_eq!(overrides.model, None);
}

#[test]
fn test_say_collects_prompt_words() {
    let args = parse_args(&["deepchat", "say", "what", "is", "-1", "squared?"]);
    match args.command {
        Some(Commands::Say { prompt }) => {
            assert_eq!(prompt, vec!["what", "is", "-1", "squared?"]);
        }
        _ => panic!("expected say subcommand"),
    }
}

#[test]
fn test_set_and_unset_parsing() {
    let args = parse_args(&["deepchat", "set", "max-tokens", "8000"]);
    match args.command {
        Some(Commands::Set { key, value }) => {
            assert_eq!(key.as_deref(), Some("max-tokens"));
            assert_eq!(value, vec!["8000"]);
        }
        _ => panic!("expected set subcommand"),
    }

    let args = parse_args(&["deepchat", "set"]);
    match args.command {
        Some(Commands::Set { key, value }) => {
            assert!(key.is_none());
            assert!(value.is_empty());
        }
        _ => panic!("expected set subcommand"),
    }

    let args = parse_args(&["deepchat", "unset", "model"]);
    assert!(matches!(args.command, Some(Commands::Unset { key }) if key == "model"));

    assert!(Args::try_parse_from(["deepchat", "unset"]).is_err());
}

#[test]
fn test_auth_subcommands_parse() {
    assert!(matches!(
        parse_args(&["deepchat", "auth"]).command,
        Some(Commands::Auth)
    ));
    assert!(matches!(
        parse_args(&["deepchat", "deauth"]).command,
        Some(Commands::Deauth)
    ));
    assert!(matches!(
        parse_args(&["deepchat", "config"]).command,
        Some(Commands::Config)
    ));
}

#[test]
fn load_settings_applies_file_then_overrides() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "max_tokens = 1000\nmodel = \"from-file\"\n").unwrap();

    let settings = load_settings(
        &config_path,
        &SettingsOverrides {
            model: Some("from-cli".to_string()),
            ..Default::default()
        },
    )
    .unwrap();

    assert_eq!(settings.model, "from-cli");
    assert_eq!(settings.window.max_tokens, 1000);

    let missing = temp_dir.path().join("absent.toml");
    let settings = load_settings(&missing, &SettingsOverrides::default()).unwrap();
    assert_eq!(settings.model, DEFAULT_MODEL);
}

#[test]
fn build_session_creates_default_profile_and_data_dirs() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let settings = Config::default().resolve(&SettingsOverrides {
        model: None,
        profile_path: Some(temp_dir.path().join("profile.json")),
        data_dir: Some(temp_dir.path().join("data")),
    });

    let session = build_session(&settings, "sk-test".to_string()).unwrap();

    assert_eq!(session.profile().name, "用户");
    assert!(temp_dir.path().join("profile.json").exists());
    let dirs = session.archive().dirs();
    assert_eq!(dirs.conversations, temp_dir.path().join("data").join("conversations"));
    assert!(dirs.conversations.is_dir());
    assert!(dirs.training_data.is_dir());
}

#[test]
fn build_session_rejects_corrupt_profile() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let profile_path = temp_dir.path().join("profile.json");
    fs::write(&profile_path, "{not json").unwrap();
    let settings = Config::default().resolve(&SettingsOverrides {
        model: None,
        profile_path: Some(profile_path),
        data_dir: Some(temp_dir.path().join("data")),
    });

    let err = build_session(&settings, "sk-test".to_string()).err().unwrap();
    assert!(err.to_string().contains("profile"));
}

#[test]
fn missing_api_key_is_reported_with_hint() {
    let store = ApiKeyStore::new_with_keyring(false);
    if std::env::var(API_KEY_ENV).is_ok_and(|value| !value.trim().is_empty()) {
        return;
    }
    let err = resolve_api_key(&store).unwrap_err();
    assert!(err.to_string().contains("deepchat auth"));
}
