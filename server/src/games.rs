use std::collections::HashMap;
use std::sync::Arc;

use dork_api::engine::{GameMeta, GameModule};
use dork_core::error::{Error, Result};

/// Build-time linked game modules, indexed by game id.
#[derive(Default)]
pub struct GameRegistry {
    modules: HashMap<String, Arc<dyn GameModule>>,
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Arc<dyn GameModule>) {
        self.modules.insert(module.meta().game_id, module);
    }

    pub fn get(&self, game_id: &str) -> Result<Arc<dyn GameModule>> {
        self.modules
            .get(game_id)
            .cloned()
            .ok_or_else(|| Error::UnknownGame(game_id.to_owned()))
    }

    pub fn contains(&self, game_id: &str) -> bool {
        self.modules.contains_key(game_id)
    }

    pub fn list_meta(&self) -> Vec<GameMeta> {
        let mut meta: Vec<GameMeta> = self.modules.values().map(|m| m.meta()).collect();
        meta.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dork_tictactoe::Tictactoe;

    #[test]
    fn test_register_and_lookup() {
        let mut games = GameRegistry::new();
        games.register(Arc::new(Tictactoe));
        assert!(games.contains("tictactoe"));
        assert!(games.get("tictactoe").is_ok());
        assert_eq!(
            games.get("chess").err(),
            Some(Error::UnknownGame("chess".into()))
        );
        assert_eq!(games.list_meta().len(), 1);
    }
}
