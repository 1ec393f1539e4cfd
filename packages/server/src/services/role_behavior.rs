use std::collections::{BTreeMap, HashMap};

use crate::error::ValidationError;
use crate::models::{
    command::{AbilityKind, NightActionKind},
    event::{DeathCause, EventKind},
    game::{Game, GamePhase, NightAction, PendingAbility, Potion},
    player::{Player, Slot, Tag},
    role::Role,
};

/// 投票で処刑されたときの扱い
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutEffect {
    Dies,
    Reveal,
}

/// 役職ごとの振る舞い。エンジンはこの契約だけを通して役職を扱う
pub trait RoleBehavior: Send + Sync {
    fn role(&self) -> Role;

    fn has_night_action(&self) -> bool {
        self.role().night_priority().is_some()
    }

    /// 夜行動を検証して記録する。成功時は本人に返すメッセージ
    fn validate_and_record(
        &self,
        _game: &mut Game,
        _actor_id: &str,
        _target: Slot,
        _kind: NightActionKind,
    ) -> Result<String, ValidationError> {
        Err(ValidationError::WrongRole)
    }

    fn on_death(&self, _actor_id: &str, _cause: DeathCause) -> Option<PendingAbility> {
        None
    }

    fn on_vote_out(&self, _player: &Player) -> VoteOutEffect {
        VoteOutEffect::Dies
    }
}

/// 全役職に共通する検証。行動者と対象の user_id を返す
fn check_actor_and_target(
    game: &Game,
    actor_id: &str,
    target: Slot,
    phase: GamePhase,
) -> Result<(String, String), ValidationError> {
    game.ensure_phase(&[phase])?;
    let actor = game.living_actor(actor_id)?;
    let target = game.living_target(target)?;
    Ok((actor.user_id.clone(), target.user_id.clone()))
}

fn record(game: &mut Game, actor_id: String, role: Role, kind: NightActionKind, target: String) {
    game.state
        .night_actions
        .insert(actor_id, NightAction { role, kind, target });
}

pub struct WolfBehavior {
    role: Role,
}

impl RoleBehavior for WolfBehavior {
    fn role(&self) -> Role {
        self.role
    }

    fn validate_and_record(
        &self,
        game: &mut Game,
        actor_id: &str,
        target: Slot,
        kind: NightActionKind,
    ) -> Result<String, ValidationError> {
        if kind != NightActionKind::Kill {
            return Err(ValidationError::WrongRole);
        }
        let (actor, target_id) =
            check_actor_and_target(game, actor_id, target, GamePhase::NightWolves)?;
        let label = game.label(&target_id);
        // 同じ夜のうちは何度でも投票先を変更できる
        record(game, actor, self.role, kind, target_id);
        Ok(format!("{}を襲撃対象に選びました", label))
    }

    fn on_death(&self, actor_id: &str, cause: DeathCause) -> Option<PendingAbility> {
        let can_claw = match self.role {
            Role::WolfKing => !matches!(cause, DeathCause::Poison | DeathCause::SelfDestruct),
            Role::WhiteWolfKing => cause == DeathCause::SelfDestruct,
            _ => false,
        };
        can_claw.then(|| PendingAbility {
            kind: AbilityKind::Claw,
            actor: actor_id.to_string(),
            cause,
        })
    }
}

pub struct SeerBehavior;

impl RoleBehavior for SeerBehavior {
    fn role(&self) -> Role {
        Role::Seer
    }

    fn validate_and_record(
        &self,
        game: &mut Game,
        actor_id: &str,
        target: Slot,
        kind: NightActionKind,
    ) -> Result<String, ValidationError> {
        if kind != NightActionKind::Check {
            return Err(ValidationError::WrongRole);
        }
        let (actor, target_id) =
            check_actor_and_target(game, actor_id, target, GamePhase::NightWolves)?;
        if actor == target_id {
            return Err(ValidationError::SelfTarget);
        }
        // 結果は即座に本人へ伝わるので、一晩に一度だけ
        if game.state.night_actions.contains_key(&actor) {
            return Err(ValidationError::AlreadyActed);
        }

        let is_wolf = game
            .player(&target_id)
            .map(|p| p.is_wolf())
            .unwrap_or(false);
        let label = game.label(&target_id);
        game.record_event(EventKind::SeerCheck { is_wolf }, Some(actor.as_str()), Some(target_id.as_str()));
        record(game, actor, Role::Seer, kind, target_id);

        Ok(if is_wolf {
            format!("占い結果: {}は人狼です", label)
        } else {
            format!("占い結果: {}は人狼ではありません", label)
        })
    }
}

pub struct WitchBehavior;

impl RoleBehavior for WitchBehavior {
    fn role(&self) -> Role {
        Role::Witch
    }

    fn validate_and_record(
        &self,
        game: &mut Game,
        actor_id: &str,
        target: Slot,
        kind: NightActionKind,
    ) -> Result<String, ValidationError> {
        let potion = match kind {
            NightActionKind::Save => Potion::Save,
            NightActionKind::Poison => Potion::Poison,
            _ => return Err(ValidationError::WrongRole),
        };
        let (actor, target_id) =
            check_actor_and_target(game, actor_id, target, GamePhase::NightWitch)?;
        if game.state.night_actions.contains_key(&actor) {
            return Err(ValidationError::AlreadyActed);
        }
        game.potions.ensure_available(potion)?;

        match potion {
            Potion::Save => {
                if game.state.wolf_target.as_deref() != Some(target_id.as_str()) {
                    return Err(ValidationError::NotAttackTarget);
                }
            }
            Potion::Poison => {
                if actor == target_id {
                    return Err(ValidationError::SelfTarget);
                }
            }
        }

        let label = game.label(&target_id);
        record(game, actor, Role::Witch, kind, target_id);
        Ok(format!("{}に{}を使いました", label, potion.label()))
    }
}

pub struct GuardBehavior;

impl RoleBehavior for GuardBehavior {
    fn role(&self) -> Role {
        Role::Guard
    }

    fn validate_and_record(
        &self,
        game: &mut Game,
        actor_id: &str,
        target: Slot,
        kind: NightActionKind,
    ) -> Result<String, ValidationError> {
        if kind != NightActionKind::Protect {
            return Err(ValidationError::WrongRole);
        }
        let (actor, target_id) =
            check_actor_and_target(game, actor_id, target, GamePhase::NightWolves)?;
        if game.state.last_protected.as_deref() == Some(target_id.as_str()) {
            return Err(ValidationError::RepeatProtect);
        }
        let label = game.label(&target_id);
        record(game, actor, Role::Guard, kind, target_id);
        Ok(format!("{}を護衛します", label))
    }
}

pub struct HunterBehavior;

impl RoleBehavior for HunterBehavior {
    fn role(&self) -> Role {
        Role::Hunter
    }

    fn on_death(&self, actor_id: &str, cause: DeathCause) -> Option<PendingAbility> {
        (cause != DeathCause::Poison).then(|| PendingAbility {
            kind: AbilityKind::Shoot,
            actor: actor_id.to_string(),
            cause,
        })
    }
}

pub struct IdiotBehavior;

impl RoleBehavior for IdiotBehavior {
    fn role(&self) -> Role {
        Role::Idiot
    }

    fn on_vote_out(&self, player: &Player) -> VoteOutEffect {
        // 二度目の処刑では正体公開で助からない
        if player.has_tag(Tag::RevealedIdiot) {
            VoteOutEffect::Dies
        } else {
            VoteOutEffect::Reveal
        }
    }
}

pub struct VillagerBehavior;

impl RoleBehavior for VillagerBehavior {
    fn role(&self) -> Role {
        Role::Villager
    }
}

static FALLBACK: VillagerBehavior = VillagerBehavior;

pub struct RoleEntry {
    pub display_name: String,
    pub behavior: Box<dyn RoleBehavior>,
}

/// 役職ごとの表示名と振る舞い。エンジン生成時に渡され、以後変更されない
pub struct RoleRegistry {
    entries: HashMap<Role, RoleEntry>,
}

impl RoleRegistry {
    pub fn standard() -> Self {
        let mut entries = HashMap::new();
        for role in Role::ALL {
            let behavior: Box<dyn RoleBehavior> = match role {
                Role::Werewolf | Role::WolfKing | Role::WhiteWolfKing => {
                    Box::new(WolfBehavior { role })
                }
                Role::Seer => Box::new(SeerBehavior),
                Role::Witch => Box::new(WitchBehavior),
                Role::Guard => Box::new(GuardBehavior),
                Role::Hunter => Box::new(HunterBehavior),
                Role::Idiot => Box::new(IdiotBehavior),
                Role::Villager => Box::new(VillagerBehavior),
            };
            entries.insert(
                role,
                RoleEntry {
                    display_name: role.to_string(),
                    behavior,
                },
            );
        }
        RoleRegistry { entries }
    }

    pub fn with_display_name(mut self, role: Role, name: &str) -> Self {
        if let Some(entry) = self.entries.get_mut(&role) {
            entry.display_name = name.to_string();
        }
        self
    }

    pub fn behavior(&self, role: Role) -> &dyn RoleBehavior {
        self.entries
            .get(&role)
            .map(|entry| entry.behavior.as_ref())
            .unwrap_or(&FALLBACK)
    }

    pub fn display_name(&self, role: Role) -> String {
        self.entries
            .get(&role)
            .map(|entry| entry.display_name.clone())
            .unwrap_or_else(|| role.to_string())
    }

    /// セッションに保存する役職名テーブルを作る
    pub fn name_table(&self, roles: impl IntoIterator<Item = Role>) -> BTreeMap<Role, String> {
        roles
            .into_iter()
            .map(|role| (role, self.display_name(role)))
            .collect()
    }
}
