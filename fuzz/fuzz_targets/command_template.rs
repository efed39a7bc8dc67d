#![no_main]

use libfuzzer_sys::fuzz_target;
use localproxy_core::{ProxyConfig, Target, format_command};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Arbitrary TOML must never panic the loader.
    let _ = ProxyConfig::from_toml_str(text);

    let config = ProxyConfig {
        proxy_host: "proxy.example".to_string(),
        username: "user".to_string(),
        password: "pass".to_string(),
        ..ProxyConfig::default()
    };
    let formatted = format_command(text, &Target::new("host.example", 22), &config);

    // Without any escape characters the template comes back unchanged.
    if !text.contains(['%', '\\']) {
        assert_eq!(formatted, text);
    }
});
