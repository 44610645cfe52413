pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# LOGPULL CONFIGURATION
# =============================================================================
# Polls a CloudWatch Logs group on a fixed interval and emits every new event
# as a record to stdout, one JSON line per record.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/logpull/config.yml
#   3. /etc/logpull/config.yml
#
# Any value may reference an environment variable with the $env{...} syntax.

# =============================================================================
# STREAM SELECTION
# =============================================================================
log_group_name: /aws/lambda/my-function

# Choose exactly one way to find streams:
#   - log_stream_name alone: poll that single stream
#   - log_stream_name + use_log_stream_name_prefix: poll every stream whose
#     name starts with log_stream_name
#   - use_todays_log_stream: poll streams prefixed with today's and
#     yesterday's date (YYYY/MM/DD), as written by Lambda
log_stream_name: app
use_log_stream_name_prefix: false
use_todays_log_stream: false

# =============================================================================
# POLLING
# =============================================================================
# Time between the start of one cycle and the start of the next.
# A number of seconds or a string with a unit: 500ms, 5s, 1m, 1h.
fetch_interval: 60s

# Where a stream with no saved position starts: 'beginning' or 'now'.
read_from: beginning

# Upper bound on pages read from one stream in one cycle. A larger backlog is
# picked up in later cycles.
max_pages_per_cycle: 100

# Read positions are saved here after every cycle.
state_file: ~/.local/share/logpull/state.json

# =============================================================================
# RECORDS
# =============================================================================
tag: cloudwatch.app

# Without a format, messages are parsed as JSON objects; anything else becomes
# {"message": "<raw text>"}. With a format, the named groups of this regex
# become the record fields.
# format: '^(?<level>[A-Z]+) (?<message>.*)$'

# Add log_group_name and log_stream_name to every record.
include_metadata: false

# =============================================================================
# RETRIES
# =============================================================================
# Every remote call is attempted up to max_retries times. After the n-th
# failure the poller sleeps n / sleep_divisor seconds.
retry:
  max_retries: 5
  sleep_divisor: 1.0

# =============================================================================
# REMOTE
# =============================================================================
remote:
  # 'aws' signs requests with the AWS SDK. 'http' sends unsigned JSON, for
  # local emulators or a signing proxy.
  backend: aws
  # Falls back to AWS_REGION or the profile when omitted.
  region: us-east-1
  # Static credentials. When omitted the SDK's default chain is used
  # (environment, shared profile, instance or task role).
  # aws_key_id: AKIA...
  # aws_sec_key: ...
  # Point at a compatible endpoint instead of the regional service.
  # endpoint: http://localhost:4566
  timeout: 30s
  # Extra headers sent with every request by the http backend.
  # headers:
  #   X-Api-Key: my-key
"#
    .to_string()
}
