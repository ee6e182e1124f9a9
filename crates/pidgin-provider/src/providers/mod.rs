pub mod anthropic;
pub mod google;
pub mod http_common;
pub mod ollama;
pub mod openai;
pub mod openrouter;
pub mod silent;
pub mod test_provider;

pub use anthropic::AnthropicProvider;
pub use google::GoogleProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;
pub use openrouter::OpenRouterProvider;
pub use silent::SilentProvider;
pub use test_provider::TestProvider;
