use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::command::AbilityKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Night,
    Day,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    WolfAttack,
    /// 護衛と救命が重なった
    ProtectionConflict,
    Poison,
    Vote,
    Shot,
    Claw,
    SelfDestruct,
}

impl fmt::Display for DeathCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeathCause::WolfAttack => write!(f, "人狼の襲撃"),
            DeathCause::ProtectionConflict => write!(f, "護衛と救命の衝突"),
            DeathCause::Poison => write!(f, "魔女の毒"),
            DeathCause::Vote => write!(f, "投票による処刑"),
            DeathCause::Shot => write!(f, "ハンターの銃撃"),
            DeathCause::Claw => write!(f, "狼王の道連れ"),
            DeathCause::SelfDestruct => write!(f, "自爆"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    GuardProtect,
    SeerCheck { is_wolf: bool },
    WerewolfAttack,
    WitchSave,
    WitchKill,
    Died { cause: DeathCause },
    VoteOut { votes: usize },
    IdiotReveal,
    HunterShoot,
    WolfKingClaw,
    AbilityDeclined { ability: AbilityKind },
    SelfDestruct,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameEvent {
    pub day: u32,
    pub phase: EventPhase,
    pub kind: EventKind,
    pub actor: Option<String>,
    pub target: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    pub events: Vec<GameEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        EventLog { events: Vec::new() }
    }

    pub fn record(
        &mut self,
        day: u32,
        phase: EventPhase,
        kind: EventKind,
        actor: Option<&str>,
        target: Option<&str>,
    ) {
        self.events.push(GameEvent {
            day,
            phase,
            kind,
            actor: actor.map(str::to_string),
            target: target.map(str::to_string),
            timestamp: Utc::now(),
        });
    }

    pub fn by_day(&self) -> BTreeMap<u32, Vec<&GameEvent>> {
        let mut days: BTreeMap<u32, Vec<&GameEvent>> = BTreeMap::new();
        for event in &self.events {
            days.entry(event.day).or_default().push(event);
        }
        days
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}
