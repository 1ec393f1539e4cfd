use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Werewolf,      // 人狼
    WolfKing,      // 狼王
    WhiteWolfKing, // 白狼王
    Seer,          // 占い師
    Witch,         // 魔女
    Guard,         // 騎士
    Hunter,        // ハンター
    Idiot,         // 愚者
    Villager,      // 村人
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Good,
    Wolf,
}

impl Role {
    pub const ALL: [Role; 9] = [
        Role::Werewolf,
        Role::WolfKing,
        Role::WhiteWolfKing,
        Role::Seer,
        Role::Witch,
        Role::Guard,
        Role::Hunter,
        Role::Idiot,
        Role::Villager,
    ];

    pub fn team(&self) -> Team {
        match self {
            Role::Werewolf | Role::WolfKing | Role::WhiteWolfKing => Team::Wolf,
            _ => Team::Good,
        }
    }

    pub fn is_wolf(&self) -> bool {
        self.team() == Team::Wolf
    }

    /// 神職（占い師・魔女・騎士・ハンター・愚者）かどうか
    pub fn is_specialist(&self) -> bool {
        matches!(
            self,
            Role::Seer | Role::Witch | Role::Guard | Role::Hunter | Role::Idiot
        )
    }

    /// 夜行動の解決順。小さいほど先に処理される。夜行動のない役職は None
    pub fn night_priority(&self) -> Option<u8> {
        match self {
            Role::Seer => Some(10),
            Role::Werewolf | Role::WolfKing | Role::WhiteWolfKing => Some(20),
            Role::Guard => Some(30),
            Role::Witch => Some(50),
            Role::Hunter | Role::Idiot | Role::Villager => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Role::Werewolf => "WEREWOLF",
            Role::WolfKing => "WOLF_KING",
            Role::WhiteWolfKing => "WHITE_WOLF_KING",
            Role::Seer => "SEER",
            Role::Witch => "WITCH",
            Role::Guard => "GUARD",
            Role::Hunter => "HUNTER",
            Role::Idiot => "IDIOT",
            Role::Villager => "VILLAGER",
        }
    }

    pub fn from_id(id: &str) -> Option<Role> {
        Role::ALL
            .iter()
            .copied()
            .find(|role| role.id().eq_ignore_ascii_case(id))
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Werewolf => "毎晩、仲間の人狼と相談して一人を襲撃します。",
            Role::WolfKing => "人狼陣営。毒以外で死亡したとき、一人を道連れにできます。",
            Role::WhiteWolfKing => "人狼陣営。昼の発言中に自爆し、一人を道連れにできます。",
            Role::Seer => "毎晩一人を占い、その人物が人狼かどうかを知ることができます。",
            Role::Witch => "救命薬と毒薬を一つずつ持ち、それぞれ一度だけ使えます。",
            Role::Guard => "毎晩一人を護衛します。二晩続けて同じ人物は護衛できません。",
            Role::Hunter => "毒以外で死亡したとき、一人を撃つことができます。",
            Role::Idiot => "投票で処刑されると正体が明かされ、生き残りますが以後投票できません。",
            Role::Villager => "特殊能力はありません。推理と投票で人狼を見つけましょう。",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Werewolf => write!(f, "人狼"),
            Role::WolfKing => write!(f, "狼王"),
            Role::WhiteWolfKing => write!(f, "白狼王"),
            Role::Seer => write!(f, "占い師"),
            Role::Witch => write!(f, "魔女"),
            Role::Guard => write!(f, "騎士"),
            Role::Hunter => write!(f, "ハンター"),
            Role::Idiot => write!(f, "愚者"),
            Role::Villager => write!(f, "村人"),
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Team::Good => write!(f, "村人陣営"),
            Team::Wolf => write!(f, "人狼陣営"),
        }
    }
}
