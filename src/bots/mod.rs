pub mod echo;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::config::BotConfig;
use crate::domain::{MultiPartAnswer, Update};
use crate::error::TurnError;
use crate::memory::{Dialog, MemoryStore};
use crate::platform::{ApiPlatform, Platform};

/// Conversational behavior plugged into a dialog turn.
///
/// A fresh value is built for every turn, so implementations may keep
/// per-turn state in `self`.
#[async_trait]
pub trait Bot: Send {
    /// Handle one inbound update. `Ok(None)` means "no reply this turn".
    async fn handle_update(&mut self, update: Update) -> Result<Option<MultiPartAnswer>>;

    /// Called once after the answer from `handle_update` has been stored.
    async fn on_answer_sent(&mut self, answer: &MultiPartAnswer) -> Result<()>;
}

/// Everything a bot gets to know about the turn it is built for.
#[derive(Clone)]
pub struct BotContext {
    pub dialog: Dialog,
    pub platform: Arc<dyn Platform>,
    pub store: MemoryStore,
}

pub type BotFactory = Arc<dyn Fn(BotContext) -> Box<dyn Bot> + Send + Sync>;

struct Registration {
    factory: BotFactory,
    platforms: HashMap<String, Arc<dyn Platform>>,
}

/// Maps bot codenames to their factory and the platforms they run on.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Default)]
pub struct BotResolver {
    bots: HashMap<String, Registration>,
}

impl BotResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bot under `codename`, replacing any previous registration.
    pub fn register(
        &mut self,
        codename: &str,
        factory: BotFactory,
        platforms: Vec<Arc<dyn Platform>>,
    ) {
        let platforms = platforms
            .into_iter()
            .map(|p| (p.codename().to_string(), p))
            .collect::<HashMap<_, _>>();
        info!(
            "Registered bot: {} (platforms: {:?})",
            codename,
            platforms.keys().collect::<Vec<_>>()
        );
        self.bots.insert(
            codename.to_string(),
            Registration { factory, platforms },
        );
    }

    /// Build a resolver from the `[[bots]]` config section.
    pub fn from_config(bots: &[BotConfig]) -> Result<Self> {
        let available: Vec<Arc<dyn Platform>> = vec![Arc::new(ApiPlatform)];

        let mut resolver = Self::new();
        for bot in bots {
            let factory = builtin_factory(&bot.kind).ok_or_else(|| {
                anyhow::anyhow!("Unknown bot kind '{}' for bot '{}'", bot.kind, bot.codename)
            })?;

            let mut platforms = Vec::new();
            for name in &bot.platforms {
                let platform = available
                    .iter()
                    .find(|p| p.codename() == name.as_str())
                    .ok_or_else(|| {
                        anyhow::anyhow!("Unknown platform '{}' for bot '{}'", name, bot.codename)
                    })?;
                platforms.push(Arc::clone(platform));
            }

            resolver.register(&bot.codename, factory, platforms);
        }
        Ok(resolver)
    }

    pub fn resolve(
        &self,
        bot_codename: &str,
        platform_codename: &str,
    ) -> Result<(Arc<dyn Platform>, BotFactory), TurnError> {
        let registration = self
            .bots
            .get(bot_codename)
            .ok_or_else(|| TurnError::BotNotFound(bot_codename.to_string()))?;
        let platform = registration
            .platforms
            .get(platform_codename)
            .ok_or_else(|| TurnError::PlatformNotFound {
                bot: bot_codename.to_string(),
                platform: platform_codename.to_string(),
            })?;
        Ok((Arc::clone(platform), Arc::clone(&registration.factory)))
    }

    pub fn codenames(&self) -> Vec<&str> {
        self.bots.keys().map(String::as_str).collect()
    }
}

/// Factory for a built-in bot kind.
fn builtin_factory(kind: &str) -> Option<BotFactory> {
    match kind {
        "echo" => Some(Arc::new(|ctx: BotContext| {
            Box::new(echo::EchoBot::new(ctx)) as Box<dyn Bot>
        })),
        "silent" => Some(Arc::new(|_ctx: BotContext| {
            Box::new(SilentBot) as Box<dyn Bot>
        })),
        _ => None,
    }
}

/// Reads every update and never replies.
pub struct SilentBot;

#[async_trait]
impl Bot for SilentBot {
    async fn handle_update(&mut self, _update: Update) -> Result<Option<MultiPartAnswer>> {
        Ok(None)
    }

    async fn on_answer_sent(&mut self, _answer: &MultiPartAnswer) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::DEFAULT_PLATFORM;

    fn config(codename: &str, kind: &str) -> BotConfig {
        BotConfig {
            codename: codename.to_string(),
            kind: kind.to_string(),
            platforms: vec![DEFAULT_PLATFORM.to_string()],
        }
    }

    #[test]
    fn test_resolve_registered_bot() {
        let resolver = BotResolver::from_config(&[config("helper", "echo")]).unwrap();
        let (platform, _factory) = resolver.resolve("helper", DEFAULT_PLATFORM).unwrap();
        assert_eq!(platform.codename(), DEFAULT_PLATFORM);
    }

    #[test]
    fn test_resolve_unknown_bot_is_not_found() {
        let resolver = BotResolver::from_config(&[config("helper", "echo")]).unwrap();
        let err = resolver.resolve("ghost-bot", DEFAULT_PLATFORM).err().unwrap();
        assert!(matches!(err, TurnError::BotNotFound(ref name) if name == "ghost-bot"));
    }

    #[test]
    fn test_resolve_unattached_platform_is_not_found() {
        let resolver = BotResolver::from_config(&[config("helper", "echo")]).unwrap();
        let err = resolver.resolve("helper", "telegram").err().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(BotResolver::from_config(&[config("helper", "oracle")]).is_err());
    }

    #[test]
    fn test_unknown_platform_rejected() {
        let mut bot = config("helper", "echo");
        bot.platforms = vec!["carrier-pigeon".to_string()];
        assert!(BotResolver::from_config(&[bot]).is_err());
    }

    #[tokio::test]
    async fn test_silent_bot_never_answers() {
        let resolver = BotResolver::from_config(&[config("quiet", "silent")]).unwrap();
        let (platform, factory) = resolver.resolve("quiet", DEFAULT_PLATFORM).unwrap();

        let store = MemoryStore::open_in_memory().unwrap();
        store.upsert_instance(1, "quiet", "alice").await.unwrap();
        let dialog = store.create_dialog(1).await.unwrap().unwrap();
        let mut bot = factory(BotContext {
            dialog,
            platform,
            store,
        });

        let update = Update {
            chat_id: 1,
            text: "anyone there?".into(),
            sequence_id: 0,
            photo: None,
            user: crate::domain::UpdateUser {
                id: 1,
                username: "alice".into(),
            },
        };
        assert!(bot.handle_update(update).await.unwrap().is_none());
    }
}
