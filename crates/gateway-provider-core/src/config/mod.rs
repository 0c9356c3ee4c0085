mod model_table;
mod provider_config;

pub use model_table::{ModelRecord, ModelTable};
pub use provider_config::{
    DeepInfraConfig, HuggingFaceConfig, OpenAICompatibleConfig, OpenRouterConfig, PortkeyConfig,
    ProviderConfig, StaticCatalogConfig, VertexConfig,
};
