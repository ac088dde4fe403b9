// Game History Listing
//
// Records returned by the games API, the search filter used by the
// listing page, and the summary shown for each game.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Game type id of Tavern Brawl matches.
pub const GAME_TYPE_TAVERN_BRAWL: u32 = 16;

/// Final player state id for a win.
pub const PLAY_STATE_WON: u32 = 4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Visibility {
    Public,
    Unlisted,
}

impl TryFrom<u8> for Visibility {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Visibility::Public),
            2 => Ok(Visibility::Unlisted),
            other => Err(format!("unknown visibility {other}")),
        }
    }
}

impl From<Visibility> for u8 {
    fn from(visibility: Visibility) -> Self {
        match visibility {
            Visibility::Public => 1,
            Visibility::Unlisted => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalGamePlayer {
    pub name: String,
    pub player_id: u32,
    #[serde(default)]
    pub account_hi: u64,
    #[serde(default)]
    pub account_lo: u64,
    #[serde(default)]
    pub is_ai: bool,
    #[serde(default)]
    pub is_first: bool,
    pub hero_id: String,
    #[serde(default)]
    pub hero_premium: bool,
    pub final_state: u32,
}

impl GlobalGamePlayer {
    pub fn won(&self) -> bool {
        self.final_state == PLAY_STATE_WON
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalGame {
    pub build: u32,
    pub match_start: DateTime<Utc>,
    pub match_end: DateTime<Utc>,
    pub game_type: u32,
    #[serde(default)]
    pub ladder_season: Option<u32>,
    #[serde(default)]
    pub scenario_id: Option<u32>,
    pub players: Vec<GlobalGamePlayer>,
    pub num_turns: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameReplay {
    pub shortid: String,
    #[serde(default)]
    pub user: Option<User>,
    pub global_game: GlobalGame,
    #[serde(default)]
    pub spectator_mode: bool,
    #[serde(default)]
    pub friendly_player_id: Option<u32>,
    #[serde(default)]
    pub replay_xml: Option<String>,
    pub build: u32,
    pub won: bool,
    #[serde(default)]
    pub disconnected: bool,
    #[serde(default)]
    pub reconnecting: bool,
    #[serde(default = "default_visibility")]
    pub visibility: Visibility,
}

fn default_visibility() -> Visibility {
    Visibility::Public
}

/// Page of results from the games API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameListing {
    pub count: u64,
    #[serde(default)]
    pub results: Vec<GameReplay>,
}

/// Lowercased, non-empty search terms.
pub fn search_terms(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// A game matches if a player name starts with a term, or a numeric term
/// equals its build.
pub fn matches(game: &GameReplay, terms: &[String]) -> bool {
    if terms.is_empty() {
        return true;
    }

    let matching_player = game.global_game.players.iter().any(|player| {
        let name = player.name.to_lowercase();
        terms.iter().any(|term| name.starts_with(term.as_str()))
    });

    let matching_build = terms
        .iter()
        .filter_map(|term| term.parse::<u32>().ok())
        .any(|build| build != 0 && build == game.build);

    matching_player || matching_build
}

pub fn filter_games<'a>(games: &'a [GameReplay], query: &str) -> Vec<&'a GameReplay> {
    let terms = search_terms(query);
    games.iter().filter(|game| matches(game, &terms)).collect()
}

const YEAR: i64 = 31_536_000;
const DAY: i64 = 86_400;
const HOUR: i64 = 3_600;

/// Coarse human-readable span: days, else hours, else minutes.
pub fn human_time(seconds: i64) -> String {
    let seconds = seconds.max(0) % YEAR;
    let days = seconds / DAY;
    let hours = (seconds % DAY) / HOUR;
    let minutes = (seconds % HOUR) / 60;

    if days > 0 {
        format!("{days} days")
    } else if hours > 0 {
        format!("{hours} hours")
    } else {
        format!("{minutes} minutes")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GameIcon {
    Disconnected,
    TavernBrawl,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSummary {
    pub name: String,
    pub hero_id: String,
    pub won: bool,
}

/// What the listing shows for one game.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSummary {
    pub link: String,
    pub won: bool,
    pub players: Vec<PlayerSummary>,
    pub played: String,
    pub duration: String,
    pub turns: u32,
    pub icon: Option<GameIcon>,
}

impl GameSummary {
    pub fn new(game: &GameReplay, now: DateTime<Utc>) -> Self {
        let global = &game.global_game;
        let duration = (global.match_end - global.match_start).num_seconds();
        let since = (now - global.match_end).num_seconds();

        let icon = if game.disconnected {
            Some(GameIcon::Disconnected)
        } else if global.game_type == GAME_TYPE_TAVERN_BRAWL {
            Some(GameIcon::TavernBrawl)
        } else {
            None
        };

        Self {
            link: format!("/replay/{}", game.shortid),
            won: game.won,
            players: global
                .players
                .iter()
                .map(|player| PlayerSummary {
                    name: player.name.clone(),
                    hero_id: player.hero_id.clone(),
                    won: player.won(),
                })
                .collect(),
            played: format!("{} ago", human_time(since)),
            duration: human_time(duration),
            turns: global.num_turns / 2,
            icon,
        }
    }
}
