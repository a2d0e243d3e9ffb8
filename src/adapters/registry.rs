//! Provider lookup by id.

use std::collections::HashMap;
use std::sync::Arc;

use super::{
    Capability, CommandProvider, FfmpegAssembler, FfmpegMotionRenderer, ImageProvider,
    LlmProvider, MediaAssembler, MotionRenderer, TtsProvider,
};
use crate::config::ResolvedConfig;
use crate::domain::ProviderId;
use crate::error::PipelineError;

/// One strategy object per provider id and capability
#[derive(Clone)]
pub struct ProviderRegistry {
    llm: HashMap<ProviderId, Arc<dyn LlmProvider>>,
    tts: HashMap<ProviderId, Arc<dyn TtsProvider>>,
    image: HashMap<ProviderId, Arc<dyn ImageProvider>>,
    renderer: Arc<dyn MotionRenderer>,
    assembler: Arc<dyn MediaAssembler>,
}

impl ProviderRegistry {
    pub fn new(renderer: Arc<dyn MotionRenderer>, assembler: Arc<dyn MediaAssembler>) -> Self {
        Self {
            llm: HashMap::new(),
            tts: HashMap::new(),
            image: HashMap::new(),
            renderer,
            assembler,
        }
    }

    /// Build from configuration: every provider with a `command` becomes a
    /// [`CommandProvider`]; rendering and assembly use ffmpeg.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self, PipelineError> {
        let render = &config.render;
        let mut registry = Self::new(
            Arc::new(FfmpegMotionRenderer::new(render.ffmpeg.clone())),
            Arc::new(FfmpegAssembler::new(render.ffmpeg.clone(), render.ffprobe.clone())),
        );

        for (id, provider) in &config.providers {
            let Some(command) = &provider.command else {
                continue;
            };
            let (program, args) = command.split_first().ok_or_else(|| {
                PipelineError::Config(format!("provider '{}' has an empty command", id))
            })?;
            let adapter = CommandProvider::new(id.as_str(), program.clone()).with_args(args.to_vec());

            registry = match provider.kind {
                Capability::Llm => registry.with_llm(id.clone(), Arc::new(adapter)),
                Capability::Tts => registry.with_tts(id.clone(), Arc::new(adapter)),
                Capability::Image => registry.with_image(id.clone(), Arc::new(adapter)),
            };
        }

        Ok(registry)
    }

    pub fn with_llm(mut self, id: impl Into<ProviderId>, provider: Arc<dyn LlmProvider>) -> Self {
        self.llm.insert(id.into(), provider);
        self
    }

    pub fn with_tts(mut self, id: impl Into<ProviderId>, provider: Arc<dyn TtsProvider>) -> Self {
        self.tts.insert(id.into(), provider);
        self
    }

    pub fn with_image(mut self, id: impl Into<ProviderId>, provider: Arc<dyn ImageProvider>) -> Self {
        self.image.insert(id.into(), provider);
        self
    }

    pub fn llm(&self, id: &ProviderId) -> Result<Arc<dyn LlmProvider>, PipelineError> {
        self.llm
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProvider(id.to_string()))
    }

    pub fn tts(&self, id: &ProviderId) -> Result<Arc<dyn TtsProvider>, PipelineError> {
        self.tts
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProvider(id.to_string()))
    }

    pub fn image(&self, id: &ProviderId) -> Result<Arc<dyn ImageProvider>, PipelineError> {
        self.image
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownProvider(id.to_string()))
    }

    pub fn renderer(&self) -> Arc<dyn MotionRenderer> {
        self.renderer.clone()
    }

    pub fn assembler(&self) -> Arc<dyn MediaAssembler> {
        self.assembler.clone()
    }

    /// Registered ids per capability, sorted (for `reelsmith config`)
    pub fn ids(&self, capability: Capability) -> Vec<ProviderId> {
        let mut ids: Vec<ProviderId> = match capability {
            Capability::Llm => self.llm.keys().cloned().collect(),
            Capability::Tts => self.tts.keys().cloned().collect(),
            Capability::Image => self.image.keys().cloned().collect(),
        };
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use std::path::PathBuf;

    #[test]
    fn test_from_config_registers_commands_only() {
        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/reelsmith"));
        let mut gemini = config.providers[&ProviderId::from("gemini")].clone();
        gemini.command = Some(vec!["python3".to_string(), "llm.py".to_string()]);
        config.providers.insert(ProviderId::from("gemini"), gemini);

        let registry = ProviderRegistry::from_config(&config).unwrap();

        assert_eq!(registry.ids(Capability::Llm), vec![ProviderId::from("gemini")]);
        assert!(registry.ids(Capability::Image).is_empty());
        assert!(matches!(
            registry.image(&ProviderId::from("imagen")),
            Err(PipelineError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_empty_command_is_config_error() {
        let mut config = ResolvedConfig::with_home(PathBuf::from("/tmp/reelsmith"));
        let mut broken = ProviderConfig::new(Capability::Tts, Default::default());
        broken.command = Some(Vec::new());
        config.providers.insert(ProviderId::from("broken"), broken);

        assert!(matches!(
            ProviderRegistry::from_config(&config),
            Err(PipelineError::Config(_))
        ));
    }
}
