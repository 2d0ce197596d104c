use crate::core::config::data::{path_display, Config, Settings};

impl Config {
    /// Print the resolved settings, marking values that come from defaults.
    pub fn print_all(&self, settings: &Settings) {
        println!("Current configuration:");
        print_entry("base-url", &settings.base_url, self.base_url.is_some());
        print_entry("model", &settings.model, self.model.is_some());
        print_entry(
            "profile-path",
            &path_display(&settings.profile_path),
            self.profile_path.is_some(),
        );
        print_entry(
            "data-dir",
            &path_display(&settings.data_dir),
            self.data_dir.is_some(),
        );
        print_entry(
            "max-tokens",
            &settings.window.max_tokens.to_string(),
            self.max_tokens.is_some(),
        );
        print_entry(
            "max-history-items",
            &settings.window.max_history_items.to_string(),
            self.max_history_items.is_some(),
        );
        print_entry(
            "max-response-tokens",
            &settings.max_response_tokens.to_string(),
            self.max_response_tokens.is_some(),
        );
        print_entry(
            "chunk-chars",
            &settings.chunk_chars.to_string(),
            self.chunk_chars.is_some(),
        );
        print_entry(
            "connect-timeout",
            &format!("{}s", settings.connect_timeout.as_secs()),
            self.connect_timeout_secs.is_some(),
        );
        print_entry(
            "idle-timeout",
            &format!("{}s", settings.idle_timeout.as_secs()),
            self.idle_timeout_secs.is_some(),
        );
        print_entry(
            "new-message-policy",
            settings.window.new_message_policy.as_str(),
            self.new_message_policy.is_some(),
        );
    }
}

fn print_entry(key: &str, value: &str, explicit: bool) {
    if explicit {
        println!("  {key}: {value}");
    } else {
        println!("  {key}: {value} (default)");
    }
}
