/// Figma REST API base URL
pub const DEFAULT_FIGMA_API_URL: &str = "https://api.figma.com/v1";

/// OpenRouter chat-completions endpoint
pub const DEFAULT_GATEWAY_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Model used for text completions
pub const DEFAULT_MODEL: &str = "openai/gpt-3.5-turbo";

/// Model used for screenshot analysis
pub const DEFAULT_VISION_MODEL: &str = "openai/gpt-4o";

/// Completion token cap sent with every gateway request
pub const DEFAULT_MAX_TOKENS: u32 = 1000;

/// Sampling temperature for text completions
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Value of the `HTTP-Referer` header sent to the gateway
pub const DEFAULT_REFERER: &str = "http://localhost:8000";

/// Value of the `X-Title` header sent to the gateway
pub const DEFAULT_TITLE: &str = "Wirefy";

/// Estimated token ceiling for a single user prompt
pub const DEFAULT_PROMPT_TOKEN_BUDGET: u64 = 6000;

/// Per-request timeout for gateway calls (seconds)
pub const DEFAULT_GATEWAY_TIMEOUT_SECS: u64 = 120;

/// Per-request timeout for Figma calls (seconds)
pub const DEFAULT_FIGMA_TIMEOUT_SECS: u64 = 30;

/// HTTP backend bind host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// HTTP backend bind port
pub const DEFAULT_PORT: u16 = 8000;

/// Backend URL used by the bridge client
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Default log level when RUST_LOG is unset
pub const DEFAULT_LOG_LEVEL: &str = "info";
