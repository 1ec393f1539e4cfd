use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::player::Player;
use super::role::{Role, Team};
use crate::error::ValidationError;

/// 人狼陣営の勝利条件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Ruleset {
    /// 屠城: 生存人狼数が生存村人陣営数以上で人狼の勝利
    #[default]
    TotalElimination,
    /// 屠辺: 神職全滅または村人全滅で人狼の勝利
    FactionWipe,
}

impl fmt::Display for Ruleset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ruleset::TotalElimination => write!(f, "屠城"),
            Ruleset::FactionWipe => write!(f, "屠辺"),
        }
    }
}

/// 投票が同数だった場合の扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    #[default]
    NoElimination,
    Random,
    Runoff,
}

impl FromStr for TiePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "no_elimination" | "none" => Ok(TiePolicy::NoElimination),
            "random" => Ok(TiePolicy::Random),
            "runoff" | "pk" => Ok(TiePolicy::Runoff),
            other => Err(format!("unknown tie policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preset {
    pub id: &'static str,
    pub name: &'static str,
    pub min_players: usize,
    pub max_players: usize,
    /// None の場合は人数から自動で配役する
    pub roles: Option<&'static [(Role, usize)]>,
    pub ruleset: Ruleset,
}

pub const DEFAULT_PRESET: &str = "default";

pub const PRESETS: [Preset; 3] = [
    Preset {
        id: DEFAULT_PRESET,
        name: "標準",
        min_players: 3,
        max_players: 18,
        roles: None,
        ruleset: Ruleset::TotalElimination,
    },
    Preset {
        id: "faction-wipe-9",
        name: "9人屠辺",
        min_players: 9,
        max_players: 9,
        roles: Some(&[
            (Role::Werewolf, 3),
            (Role::Seer, 1),
            (Role::Witch, 1),
            (Role::Hunter, 1),
            (Role::Villager, 3),
        ]),
        ruleset: Ruleset::FactionWipe,
    },
    Preset {
        id: "idiot-12",
        name: "12人 占い・魔女・ハンター・愚者",
        min_players: 12,
        max_players: 12,
        roles: Some(&[
            (Role::Werewolf, 4),
            (Role::Seer, 1),
            (Role::Witch, 1),
            (Role::Hunter, 1),
            (Role::Idiot, 1),
            (Role::Villager, 4),
        ]),
        ruleset: Ruleset::FactionWipe,
    },
];

pub const SUPPORTED_PLAYER_COUNTS: [usize; 14] = [3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 18];

pub fn find_preset(id: &str) -> Option<&'static Preset> {
    PRESETS.iter().find(|p| p.id == id)
}

/// ゲーム開始時に確定する配役とルール
#[derive(Debug, Clone, PartialEq)]
pub struct GameSetup {
    pub preset: &'static str,
    pub ruleset: Ruleset,
    pub distribution: BTreeMap<Role, usize>,
}

/// 人数に合わないプリセットは標準にフォールバックする
pub fn resolve_setup(preset_id: &str, player_count: usize) -> Result<GameSetup, ValidationError> {
    if let Some(preset) = find_preset(preset_id) {
        if let Some(roles) = preset.roles {
            let total: usize = roles.iter().map(|(_, n)| n).sum();
            if (preset.min_players..=preset.max_players).contains(&player_count)
                && total == player_count
            {
                return Ok(GameSetup {
                    preset: preset.id,
                    ruleset: preset.ruleset,
                    distribution: roles.iter().copied().collect(),
                });
            }
        }
    }

    Ok(GameSetup {
        preset: DEFAULT_PRESET,
        ruleset: Ruleset::TotalElimination,
        distribution: calculate_role_distribution(player_count)?,
    })
}

/// 人数ごとの (人狼, 神職, 村人)
fn faction_sizes(player_count: usize) -> Option<(usize, usize, usize)> {
    let sizes = match player_count {
        3 => (1, 1, 1),
        4 => (1, 1, 2),
        5 => (1, 1, 3),
        6 => (2, 2, 2),
        7 => (2, 2, 3),
        8 => (3, 3, 2),
        9 => (3, 3, 3),
        10 => (3, 3, 4),
        11 => (4, 4, 3),
        12 => (4, 4, 4),
        13 => (4, 4, 5),
        14 => (5, 5, 4),
        15 => (5, 5, 5),
        18 => (6, 6, 6),
        _ => return None,
    };
    Some(sizes)
}

pub fn calculate_role_distribution(
    player_count: usize,
) -> Result<BTreeMap<Role, usize>, ValidationError> {
    let (wolves, gods, villagers) = faction_sizes(player_count)
        .ok_or(ValidationError::UnsupportedPlayerCount(player_count))?;

    let mut distribution = BTreeMap::new();
    distribution.insert(Role::Werewolf, wolves);
    distribution.insert(Role::Seer, 1);

    // 6人戦は占い師＋騎士、それ以外は魔女・ハンター・騎士・愚者の順
    let extra_gods: &[Role] = if player_count == 6 {
        &[Role::Guard]
    } else {
        &[Role::Witch, Role::Hunter, Role::Guard, Role::Idiot]
    };
    let mut assigned_gods = 1;
    for role in extra_gods.iter().take(gods.saturating_sub(1)) {
        distribution.insert(*role, 1);
        assigned_gods += 1;
    }

    // 埋まらなかった神職枠は村人になる
    let villagers = villagers + gods.saturating_sub(assigned_gods);
    if villagers > 0 {
        distribution.insert(Role::Villager, villagers);
    }

    Ok(distribution)
}

pub fn check_winner(players: &[Player], ruleset: Ruleset) -> Option<Team> {
    let alive: Vec<&Player> = players.iter().filter(|p| p.is_alive).collect();
    let wolves = alive.iter().filter(|p| p.is_wolf()).count();
    if wolves == 0 {
        return Some(Team::Good);
    }

    match ruleset {
        Ruleset::TotalElimination => {
            let good = alive.len() - wolves;
            (wolves >= good).then_some(Team::Wolf)
        }
        Ruleset::FactionWipe => {
            let specialists = alive
                .iter()
                .filter(|p| p.role.map(|r| r.is_specialist()).unwrap_or(false))
                .count();
            let villagers = alive
                .iter()
                .filter(|p| p.has_role(Role::Villager))
                .count();
            (specialists == 0 || villagers == 0).then_some(Team::Wolf)
        }
    }
}
