//! Shared engine state, built once and handed to every pipeline stage.

use std::sync::Arc;

use crate::chain::ChainSessionStore;
use crate::command_parser::{CommandParser, SymbolicCommandParser};
use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::EngineError;
use crate::frameworks::{FrameworkManager, StaticFrameworkManager};
use crate::gates::{
    GateDefinitionLoader, GateEnforcer, GateReferenceResolver, GateRegistry, MarkerStore,
    ShellVerifier, StaticGateLoader, YamlGateLoader,
};
use crate::injection::{InjectionResolver, OverrideStore};
use crate::prompts::PromptLibrary;
use crate::renderer::{PlaceholderRenderer, TemplateRenderer};
use crate::scripts::{ProcessScriptExecutor, ScriptExecutor};

/// Process-wide collaborators and stores.
pub struct EngineStateInner {
    pub config: EngineConfig,
    pub prompts: PromptLibrary,
    pub parser: Box<dyn CommandParser>,
    pub renderer: Box<dyn TemplateRenderer>,
    pub frameworks: Box<dyn FrameworkManager>,
    pub gate_registry: Arc<GateRegistry>,
    pub gate_resolver: GateReferenceResolver,
    pub enforcer: GateEnforcer,
    pub verifier: ShellVerifier,
    pub sessions: ChainSessionStore,
    pub injection: InjectionResolver,
    pub overrides: Arc<OverrideStore>,
}

pub type EngineState = Arc<EngineStateInner>;

impl EngineStateInner {
    pub fn builder(config: EngineConfig) -> EngineStateBuilder {
        EngineStateBuilder::new(config)
    }
}

/// Swaps individual collaborators, mostly for tests.
pub struct EngineStateBuilder {
    config: EngineConfig,
    prompts: Option<PromptLibrary>,
    gate_loader: Option<Arc<dyn GateDefinitionLoader>>,
    executor: Option<Arc<dyn ScriptExecutor>>,
    parser: Option<Box<dyn CommandParser>>,
    renderer: Option<Box<dyn TemplateRenderer>>,
    frameworks: Option<Box<dyn FrameworkManager>>,
    database: Option<Database>,
}

impl EngineStateBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            prompts: None,
            gate_loader: None,
            executor: None,
            parser: None,
            renderer: None,
            frameworks: None,
            database: None,
        }
    }

    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_gate_loader(mut self, loader: Arc<dyn GateDefinitionLoader>) -> Self {
        self.gate_loader = Some(loader);
        self
    }

    pub fn with_script_executor(mut self, executor: Arc<dyn ScriptExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn with_parser(mut self, parser: Box<dyn CommandParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn with_renderer(mut self, renderer: Box<dyn TemplateRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_frameworks(mut self, frameworks: Box<dyn FrameworkManager>) -> Self {
        self.frameworks = Some(frameworks);
        self
    }

    pub fn with_database(mut self, db: Database) -> Self {
        self.database = Some(db);
        self
    }

    pub fn build(self) -> Result<EngineState, EngineError> {
        let config = self.config;

        let prompts = match self.prompts {
            Some(p) => p,
            None => {
                let library = PromptLibrary::new();
                library.load_default(config.prompts_dir.as_deref());
                library
            }
        };

        let gate_loader: Arc<dyn GateDefinitionLoader> = match (self.gate_loader, &config.gates_dir) {
            (Some(loader), _) => loader,
            (None, Some(dir)) => Arc::new(YamlGateLoader::new(dir.clone())),
            (None, None) => Arc::new(StaticGateLoader::new(Vec::new())),
        };
        let gate_registry = Arc::new(GateRegistry::new(gate_loader));

        let executor = self
            .executor
            .unwrap_or_else(|| Arc::new(ProcessScriptExecutor));
        let verifier = ShellVerifier::new(executor, MarkerStore::new(config.marker_path()));

        let database = match self.database {
            Some(db) => Some(db),
            None if config.persistence.enabled => Some(Database::open(&config.database_path())?),
            None => None,
        };
        let sessions = match database {
            Some(db) => ChainSessionStore::with_database(db),
            None => ChainSessionStore::new(),
        };

        let overrides = Arc::new(OverrideStore::new());
        let frameworks = self.frameworks.unwrap_or_else(|| {
            Box::new(StaticFrameworkManager::new(
                config.frameworks.definitions.clone(),
                config.frameworks.active.clone(),
            ))
        });

        tracing::info!(
            "[EngineState] Ready: {} prompt(s), {} canonical gate(s), persistence {}",
            prompts.len(),
            gate_registry.canonical_ids().len(),
            if config.persistence.enabled { "on" } else { "off" }
        );

        Ok(Arc::new(EngineStateInner {
            prompts,
            parser: self.parser.unwrap_or_else(|| Box::new(SymbolicCommandParser)),
            renderer: self.renderer.unwrap_or_else(|| Box::new(PlaceholderRenderer)),
            frameworks,
            gate_resolver: GateReferenceResolver::new(gate_registry.clone()),
            gate_registry,
            enforcer: GateEnforcer::new(config.retry),
            verifier,
            sessions,
            injection: InjectionResolver::new(config.injection.clone(), overrides.clone()),
            overrides,
            config,
        }))
    }
}
