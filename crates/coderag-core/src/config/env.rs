use super::Config;

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CODERAG_EMBED_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.embedding.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODERAG_EMBED_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_EMBED_MODEL") {
            self.embedding.model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_EMBED_BASE_URL") {
            self.embedding.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_PROVIDER") {
            if let Ok(kind) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.generation.provider = kind;
            } else {
                tracing::warn!("ignoring invalid CODERAG_LLM_PROVIDER value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_MODEL") {
            self.generation.model = v;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_BASE_URL") {
            self.generation.base_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_API_KEY")
            && !v.is_empty()
        {
            self.generation.api_key = Some(v);
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_MAX_TOKENS")
            && let Ok(n) = v.parse::<u32>()
        {
            self.generation.max_tokens = n;
        }
        if let Ok(v) = std::env::var("CODERAG_LLM_TEMPERATURE")
            && let Ok(t) = v.parse::<f32>()
        {
            self.generation.temperature = t;
        }
        if let Ok(v) = std::env::var("CODERAG_VECTOR_BACKEND") {
            if let Ok(backend) = serde_json::from_value(serde_json::Value::String(v.clone())) {
                self.vector.backend = backend;
            } else {
                tracing::warn!("ignoring invalid CODERAG_VECTOR_BACKEND value: {v}");
            }
        }
        if let Ok(v) = std::env::var("CODERAG_QDRANT_URL") {
            self.vector.qdrant_url = v;
        }
        if let Ok(v) = std::env::var("CODERAG_GRAPH_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.graph.enabled = enabled;
        }
        if let Ok(v) = std::env::var("CODERAG_GRAPH_PATH") {
            self.graph.path = v;
        }
        if let Ok(v) = std::env::var("CODERAG_TOP_K")
            && let Ok(k) = v.parse::<usize>()
        {
            self.retrieval.top_k = k;
        }
        if let Ok(v) = std::env::var("CODERAG_CACHE_ENABLED")
            && let Ok(enabled) = v.parse::<bool>()
        {
            self.cache.enabled = enabled;
        }
        if let Ok(v) = std::env::var("CODERAG_CACHE_THRESHOLD")
            && let Ok(threshold) = v.parse::<f32>()
        {
            self.cache.threshold = threshold;
        }
        if let Ok(v) = std::env::var("CODERAG_CACHE_MIN_OVERLAP")
            && let Ok(overlap) = v.parse::<f32>()
        {
            self.cache.min_lexical_overlap = overlap;
        }
    }
}
