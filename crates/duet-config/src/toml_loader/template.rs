//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Duet Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[identity]
# display_name = ""              # empty = derive from the host name

[call]
# incoming_policy = "auto_accept"  # auto_accept, manual_prompt
# pending_timeout_secs = 0         # 0 disables expiry; else 5-3600
# audio = true
# video = true

[[ice.servers]]
urls = ["stun:stun.l.google.com:19302"]

# Relays need credentials:
# [[ice.servers]]
# urls = ["turn:relay.example.com:3480"]
# username = "..."
# credential = "..."

[typing]
# idle_timeout_ms = 1000         # 200-10000

[logging]
# level = "INFO"                 # DEBUG, INFO, WARNING, ERROR
"##
    .to_string()
}
