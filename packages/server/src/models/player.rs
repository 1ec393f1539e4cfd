use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use super::role::Role;

pub const MAX_SLOT: u8 = 99;

/// セッション内での2桁の席番号（01〜99）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Slot(u8);

impl Slot {
    pub const FIRST: Slot = Slot(1);

    pub fn new(number: u8) -> Option<Self> {
        (1..=MAX_SLOT).contains(&number).then_some(Slot(number))
    }

    pub fn number(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.0)
    }
}

impl FromStr for Slot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let number = s
            .trim()
            .parse::<u8>()
            .map_err(|_| format!("不正な番号です: {}", s))?;
        Slot::new(number).ok_or_else(|| format!("番号は01〜{}で指定してください", MAX_SLOT))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Tag {
    Guarded,
    Dying,
    SavedByWitch,
    PoisonedByWitch,
    RevealedIdiot,
}

impl Tag {
    pub fn is_persistent(&self) -> bool {
        matches!(self, Tag::RevealedIdiot)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub user_id: String,
    pub nickname: String,
    pub slot: Slot,
    pub is_alive: bool,
    pub role: Option<Role>,
    #[serde(default)]
    pub tags: BTreeSet<Tag>,
}

impl Player {
    pub fn new(user_id: String, nickname: String, slot: Slot) -> Self {
        Self {
            user_id,
            nickname,
            slot,
            is_alive: true,
            role: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn has_tag(&self, tag: Tag) -> bool {
        self.tags.contains(&tag)
    }

    pub fn add_tag(&mut self, tag: Tag) {
        self.tags.insert(tag);
    }

    pub fn clear_night_tags(&mut self) {
        self.tags.retain(|tag| tag.is_persistent());
    }

    pub fn is_wolf(&self) -> bool {
        self.role.map(|role| role.is_wolf()).unwrap_or(false)
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.role == Some(role)
    }

    /// 投票権があるか（生存していて、正体が明かされた愚者ではない）
    pub fn can_vote(&self) -> bool {
        self.is_alive && !self.has_tag(Tag::RevealedIdiot)
    }

    /// 表示用: "nickname(03番)"
    pub fn info(&self) -> String {
        format!("{}({}番)", self.nickname, self.slot)
    }
}

/// 空いている最小の席番号を返す
pub fn next_free_slot(players: &[Player]) -> Option<Slot> {
    let taken: BTreeSet<u8> = players.iter().map(|p| p.slot.number()).collect();
    (1..=MAX_SLOT).find(|n| !taken.contains(n)).and_then(Slot::new)
}
