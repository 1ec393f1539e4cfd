use std::collections::BTreeMap;

use crate::models::{
    command::NightActionKind,
    event::{DeathCause, EventKind},
    game::{Game, PendingAbility, Potion},
    player::Tag,
    role::{Role, Team},
};
use crate::services::role_behavior::RoleRegistry;
use crate::utils::clock::RandomSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Death {
    pub user_id: String,
    pub cause: DeathCause,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NightOutcome {
    pub summary: String,
    pub deaths: Vec<Death>,
    /// ハンター → 狼王の順に並ぶ
    pub abilities: Vec<PendingAbility>,
    pub winner: Option<Team>,
}

fn is_alive(game: &Game, user_id: &str) -> bool {
    game.player(user_id).map(|p| p.is_alive).unwrap_or(false)
}

fn actor_has_role(game: &Game, user_id: &str, role: Role) -> bool {
    game.player(user_id)
        .map(|p| p.is_alive && p.has_role(role))
        .unwrap_or(false)
}

/// 生存している人狼陣営の投票を一人一票で集計する。最多が同数なら抽選
pub fn tally_wolf_target(game: &Game, rng: &dyn RandomSource) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for (actor, action) in &game.state.night_actions {
        if action.kind != NightActionKind::Kill {
            continue;
        }
        let actor_is_wolf = game
            .player(actor)
            .map(|p| p.is_alive && p.is_wolf())
            .unwrap_or(false);
        if actor_is_wolf && is_alive(game, &action.target) {
            *counts.entry(action.target.as_str()).or_default() += 1;
        }
    }

    let top = counts.values().copied().max()?;
    let mut candidates: Vec<&str> = counts
        .iter()
        .filter(|(_, count)| **count == top)
        .map(|(target, _)| *target)
        .collect();
    candidates.sort_by_key(|id| game.player(id).map(|p| p.slot));

    let index = if candidates.len() > 1 {
        rng.pick_index(candidates.len())
    } else {
        0
    };
    candidates.get(index).map(|id| id.to_string())
}

/// 一晩分の行動を解決する。タグだけを使って生死を決める
pub fn resolve_night(
    game: &mut Game,
    registry: &RoleRegistry,
    rng: &dyn RandomSource,
) -> NightOutcome {
    for player in game.players.iter_mut() {
        player.clear_night_tags();
    }

    // 1. 騎士の護衛
    let guard_target = game
        .state
        .night_actions
        .iter()
        .find(|(actor, action)| {
            action.kind == NightActionKind::Protect && actor_has_role(game, actor, Role::Guard)
        })
        .map(|(actor, action)| (actor.clone(), action.target.clone()))
        .filter(|(_, target)| {
            is_alive(game, target) && game.state.last_protected.as_deref() != Some(target.as_str())
        });
    match guard_target {
        Some((guard, target)) => {
            if let Some(player) = game.player_mut(&target) {
                player.add_tag(Tag::Guarded);
            }
            game.record_event(EventKind::GuardProtect, Some(guard.as_str()), Some(target.as_str()));
            game.state.last_protected = Some(target);
        }
        None => game.state.last_protected = None,
    }

    // 2. 人狼の襲撃
    let wolf_target = game
        .state
        .wolf_target
        .take()
        .filter(|target| is_alive(game, target))
        .or_else(|| tally_wolf_target(game, rng));
    if let Some(target) = &wolf_target {
        if let Some(player) = game.player_mut(target) {
            player.add_tag(Tag::Dying);
        }
        game.record_event(EventKind::WerewolfAttack, None, Some(target.as_str()));
    }

    // 3. 魔女の薬
    let witch_action = game
        .state
        .night_actions
        .iter()
        .find(|(actor, action)| {
            matches!(action.kind, NightActionKind::Save | NightActionKind::Poison)
                && actor_has_role(game, actor, Role::Witch)
        })
        .map(|(actor, action)| (actor.clone(), action.clone()));
    if let Some((witch, action)) = witch_action {
        match action.kind {
            NightActionKind::Save
                if game.potions.is_available(Potion::Save)
                    && wolf_target.as_deref() == Some(action.target.as_str()) =>
            {
                if let Some(player) = game.player_mut(&action.target) {
                    player.add_tag(Tag::SavedByWitch);
                }
                game.potions.consume(Potion::Save);
                game.record_event(EventKind::WitchSave, Some(witch.as_str()), Some(action.target.as_str()));
            }
            NightActionKind::Poison
                if game.potions.is_available(Potion::Poison) && is_alive(game, &action.target) =>
            {
                if let Some(player) = game.player_mut(&action.target) {
                    player.add_tag(Tag::Dying);
                    player.add_tag(Tag::PoisonedByWitch);
                }
                game.potions.consume(Potion::Poison);
                game.record_event(EventKind::WitchKill, Some(witch.as_str()), Some(action.target.as_str()));
            }
            _ => {}
        }
    }

    // 死亡判定。毒は無条件、襲撃は護衛と救命のどちらか一方だけなら生存
    let deaths: Vec<Death> = game
        .players
        .iter()
        .filter(|p| p.is_alive && p.has_tag(Tag::Dying))
        .filter_map(|p| {
            let guarded = p.has_tag(Tag::Guarded);
            let saved = p.has_tag(Tag::SavedByWitch);
            let cause = if p.has_tag(Tag::PoisonedByWitch) {
                DeathCause::Poison
            } else if guarded && saved {
                DeathCause::ProtectionConflict
            } else if guarded || saved {
                return None;
            } else {
                DeathCause::WolfAttack
            };
            Some(Death {
                user_id: p.user_id.clone(),
                cause,
            })
        })
        .collect();

    for death in &deaths {
        game.kill(&death.user_id);
    }
    for death in &deaths {
        game.record_event(
            EventKind::Died { cause: death.cause },
            None,
            Some(death.user_id.as_str()),
        );
    }

    let mut abilities: Vec<PendingAbility> = deaths
        .iter()
        .filter_map(|death| {
            let role = game.player(&death.user_id)?.role?;
            registry.behavior(role).on_death(&death.user_id, death.cause)
        })
        .collect();
    abilities.sort_by_key(|ability| ability.kind);

    game.state.night_actions.clear();

    let summary = if deaths.is_empty() {
        "昨夜は誰も死亡しませんでした。".to_string()
    } else {
        let names: Vec<String> = deaths.iter().map(|d| game.label(&d.user_id)).collect();
        format!("昨夜、{}が死亡しました。", names.join("、"))
    };

    NightOutcome {
        summary,
        deaths,
        abilities,
        winner: game.winner(),
    }
}
