use std::time::Duration;

use werewolf_server::{
    error::{GameError, ValidationError},
    models::{
        command::{AbilityKind, CreateGameRequest, NightActionKind},
        config::GameConfig,
        game::{Game, GamePhase},
        player::Tag,
        role::Role,
    },
    services::{deadline_sweeper, game_service},
    utils::{
        clock::Clock,
        test_setup::{game_with_roles, test_harness, test_harness_with_config, ScriptedRandom, TestHarness},
    },
};

fn create_request(session_id: &str, owner: &str) -> CreateGameRequest {
    CreateGameRequest {
        session_id: Some(session_id.to_string()),
        owner_id: owner.to_string(),
        nickname: "P1".to_string(),
        preset: None,
    }
}

/// u1 がホストで、u2.. が順に参加した募集中のゲーム
async fn lobby(harness: &TestHarness, session_id: &str, players: usize) {
    game_service::create_game(&harness.state, create_request(session_id, "u1"))
        .await
        .unwrap();
    for i in 2..=players {
        game_service::join_game(
            &harness.state,
            session_id,
            &format!("u{}", i),
            &format!("P{}", i),
        )
        .await
        .unwrap();
    }
}

/// 進行中のゲームを直接ストアに置く。夜の期限は今から夜の制限時間後
async fn seed_night(harness: &TestHarness, roles: &[Role]) -> Game {
    let mut game = game_with_roles(roles);
    game.state.deadline = Some(harness.clock.now() + chrono::Duration::seconds(40));
    harness.state.store.insert(&game).await.unwrap();
    game
}

async fn load(harness: &TestHarness, session_id: &str) -> Game {
    harness
        .state
        .store
        .load(session_id)
        .await
        .unwrap()
        .expect("session should exist")
        .value
}

/// 期限を過ぎるまで時計を進めて一度走査する
async fn expire(harness: &TestHarness, seconds: u64) -> usize {
    harness.clock.advance(Duration::from_secs(seconds));
    deadline_sweeper::sweep_once(&harness.state).await.unwrap()
}

#[tokio::test]
async fn test_full_game_until_village_wins() {
    let harness = test_harness(ScriptedRandom::with_role_order(vec![
        Role::Werewolf,
        Role::Seer,
    ]));
    let state = &harness.state;
    lobby(&harness, "g1", 4).await;

    assert!(matches!(
        game_service::start_game(state, "g1", "u2").await,
        Err(GameError::Validation(ValidationError::NotHost))
    ));
    game_service::start_game(state, "g1", "u1").await.unwrap();
    let game = load(&harness, "g1").await;
    assert_eq!(game.phase(), GamePhase::NightWolves);
    assert_eq!(game.state.day, 1);
    assert!(harness
        .notifier
        .directs_to("u1")
        .iter()
        .any(|t| t.contains("あなたの役職は人狼です")));

    // 占いは即座に結果が返り、一晩に一度だけ
    let result = game_service::submit_night_action(state, "u2", "SEER", NightActionKind::Check, "01")
        .await
        .unwrap();
    assert_eq!(result, "占い結果: P1(01番)は人狼です");
    assert!(matches!(
        game_service::submit_night_action(state, "u2", "SEER", NightActionKind::Check, "03").await,
        Err(GameError::Validation(ValidationError::AlreadyActed))
    ));
    assert!(matches!(
        game_service::submit_night_action(state, "u3", "SEER", NightActionKind::Check, "01").await,
        Err(GameError::Validation(ValidationError::WrongRole))
    ));
    game_service::submit_night_action(state, "u1", "WEREWOLF", NightActionKind::Kill, "03")
        .await
        .unwrap();

    // 夜の期限前は何も起きない
    assert_eq!(expire(&harness, 10).await, 0);
    assert_eq!(expire(&harness, 31).await, 1);
    assert_eq!(load(&harness, "g1").await.phase(), GamePhase::NightWitch);
    assert_eq!(expire(&harness, 31).await, 1);

    let game = load(&harness, "g1").await;
    assert_eq!(game.phase(), GamePhase::DaySpeak);
    assert!(!game.player("u3").unwrap().is_alive);
    assert!(harness
        .notifier
        .broadcasts()
        .contains(&"昨夜、P3(03番)が死亡しました。".to_string()));

    assert!(matches!(
        game_service::end_speech(state, "u2").await,
        Err(GameError::Validation(ValidationError::NotCurrentSpeaker))
    ));
    for speaker in ["u1", "u2", "u4"] {
        game_service::end_speech(state, speaker).await.unwrap();
    }
    assert_eq!(load(&harness, "g1").await.phase(), GamePhase::DayVote);

    assert!(matches!(
        game_service::submit_vote(state, "u3", "01").await,
        Err(GameError::Validation(ValidationError::DeadActor))
    ));
    assert!(matches!(
        game_service::submit_vote(state, "u2", "02").await,
        Err(GameError::Validation(ValidationError::SelfTarget))
    ));
    game_service::submit_vote(state, "u2", "01").await.unwrap();
    assert!(matches!(
        game_service::submit_vote(state, "u2", "04").await,
        Err(GameError::Validation(ValidationError::AlreadyVoted))
    ));
    game_service::submit_vote(state, "u4", "01").await.unwrap();
    // 最後の一票で締め切られ、人狼がいなくなって終了する
    game_service::submit_vote(state, "u1", "02").await.unwrap();

    assert!(state.store.load("g1").await.unwrap().is_none());
    assert_eq!(state.store.session_for_player("u2").await.unwrap(), None);
    let broadcasts = harness.notifier.broadcasts();
    assert!(broadcasts.iter().any(|b| b.contains("村人陣営の勝利")));
    assert!(broadcasts.iter().any(|b| b.contains("=== ゲームの振り返り ===")));
}

#[tokio::test]
async fn test_guard_alone_saves_attack_target() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    let game = seed_night(&harness, &[Role::Werewolf, Role::Guard, Role::Villager, Role::Witch]).await;

    game_service::submit_night_action(state, "u1", "WEREWOLF", NightActionKind::Kill, "03")
        .await
        .unwrap();
    game_service::submit_night_action(state, "u2", "GUARD", NightActionKind::Protect, "03")
        .await
        .unwrap();
    expire(&harness, 41).await;
    expire(&harness, 31).await;

    let game = load(&harness, &game.session_id).await;
    assert_eq!(game.phase(), GamePhase::DaySpeak);
    assert!(game.players.iter().all(|p| p.is_alive));
    assert_eq!(game.state.last_protected.as_deref(), Some("u3"));
}

#[tokio::test]
async fn test_guard_and_save_together_kill_target() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    let game = seed_night(&harness, &[Role::Werewolf, Role::Guard, Role::Villager, Role::Witch]).await;

    game_service::submit_night_action(state, "u1", "WEREWOLF", NightActionKind::Kill, "03")
        .await
        .unwrap();
    game_service::submit_night_action(state, "u2", "GUARD", NightActionKind::Protect, "03")
        .await
        .unwrap();
    // 魔女フェーズ前は薬を使えない
    assert!(matches!(
        game_service::submit_night_action(state, "u4", "WITCH", NightActionKind::Save, "03").await,
        Err(GameError::Validation(ValidationError::WrongPhase))
    ));
    expire(&harness, 41).await;
    assert!(harness.notifier.directs_to("u4").iter().any(|t| t.contains("今夜襲撃されたのはP3(03番)です。")));

    assert!(matches!(
        game_service::submit_night_action(state, "u4", "WITCH", NightActionKind::Save, "02").await,
        Err(GameError::Validation(ValidationError::NotAttackTarget))
    ));
    game_service::submit_night_action(state, "u4", "WITCH", NightActionKind::Save, "03")
        .await
        .unwrap();
    expire(&harness, 31).await;

    let game = load(&harness, &game.session_id).await;
    assert!(!game.player("u3").unwrap().is_alive);
    assert!(!game.potions.save);
    assert!(game.potions.poison);
}

#[tokio::test]
async fn test_poison_is_unconditional() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    let game = seed_night(
        &harness,
        &[Role::Werewolf, Role::Guard, Role::Villager, Role::Witch, Role::Villager],
    )
    .await;

    game_service::submit_night_action(state, "u1", "WEREWOLF", NightActionKind::Kill, "03")
        .await
        .unwrap();
    game_service::submit_night_action(state, "u2", "GUARD", NightActionKind::Protect, "03")
        .await
        .unwrap();
    expire(&harness, 41).await;
    game_service::submit_night_action(state, "u4", "WITCH", NightActionKind::Poison, "02")
        .await
        .unwrap();
    expire(&harness, 31).await;

    let game = load(&harness, &game.session_id).await;
    assert!(!game.player("u2").unwrap().is_alive);
    assert!(game.player("u3").unwrap().is_alive);
    assert_eq!(game.phase(), GamePhase::DaySpeak);
}

#[tokio::test]
async fn test_concurrent_joins_get_unique_slots() {
    let config = GameConfig {
        save_retries: 32,
        ..GameConfig::default()
    };
    let harness = test_harness_with_config(config, ScriptedRandom::default());
    lobby(&harness, "g1", 1).await;

    let mut handles = Vec::new();
    for i in 2..=12 {
        let state = harness.state.clone();
        handles.push(tokio::spawn(async move {
            game_service::join_game(&state, "g1", &format!("u{}", i), &format!("P{}", i)).await
        }));
    }
    let mut slots = Vec::new();
    for handle in handles {
        slots.push(handle.await.unwrap().unwrap().number());
    }
    slots.sort_unstable();
    assert_eq!(slots, (2..=12).collect::<Vec<u8>>());
    assert_eq!(load(&harness, "g1").await.players.len(), 12);
}

#[tokio::test]
async fn test_join_rules() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    lobby(&harness, "g1", 3).await;
    game_service::create_game(state, create_request("g2", "x1"))
        .await
        .unwrap();

    assert!(matches!(
        game_service::join_game(state, "g2", "u2", "P2").await,
        Err(GameError::Validation(ValidationError::InAnotherGame))
    ));
    assert!(matches!(
        game_service::join_game(state, "g1", "u2", "P2").await,
        Err(GameError::Validation(ValidationError::AlreadyJoined))
    ));
    assert!(matches!(
        game_service::join_game(state, "missing", "y1", "Y").await,
        Err(GameError::NotFound(_))
    ));

    // 退出した席は次の参加者が埋める
    game_service::leave_game(state, "u2").await.unwrap();
    let slot = game_service::join_game(state, "g1", "u9", "P9").await.unwrap();
    assert_eq!(slot.to_string(), "02");
}

#[tokio::test]
async fn test_unsupported_player_count_keeps_lobby() {
    let harness = test_harness(ScriptedRandom::default());
    lobby(&harness, "g1", 2).await;

    assert!(matches!(
        game_service::start_game(&harness.state, "g1", "u1").await,
        Err(GameError::Validation(ValidationError::UnsupportedPlayerCount(2)))
    ));
    let game = load(&harness, "g1").await;
    assert_eq!(game.phase(), GamePhase::Waiting);
    assert!(game.players.iter().all(|p| p.role.is_none()));
}

#[tokio::test]
async fn test_stale_and_duplicate_deadlines_are_ignored() {
    let harness = test_harness(ScriptedRandom::default());
    let game = seed_night(&harness, &[Role::Werewolf, Role::Seer, Role::Villager, Role::Villager]).await;
    let due_at = game.state.deadline.unwrap();

    let stale = due_at - chrono::Duration::seconds(5);
    assert!(!game_service::handle_deadline(&harness.state, &game.session_id, stale)
        .await
        .unwrap());
    assert_eq!(load(&harness, &game.session_id).await.phase(), GamePhase::NightWolves);

    harness.clock.advance(Duration::from_secs(41));
    let (a, b) = tokio::join!(
        deadline_sweeper::sweep_once(&harness.state),
        deadline_sweeper::sweep_once(&harness.state)
    );
    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(load(&harness, &game.session_id).await.phase(), GamePhase::NightWitch);
}

#[tokio::test]
async fn test_idiot_survives_vote_and_loses_vote() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    let mut game = game_with_roles(&[
        Role::Werewolf,
        Role::Idiot,
        Role::Villager,
        Role::Seer,
        Role::Villager,
    ]);
    game.state.phase = GamePhase::DayVote;
    state.store.insert(&game).await.unwrap();

    for (voter, target) in [("u1", "02"), ("u3", "02"), ("u4", "02"), ("u5", "01")] {
        game_service::submit_vote(state, voter, target).await.unwrap();
    }
    game_service::submit_vote(state, "u2", "01").await.unwrap();

    let versioned = state.store.load(&game.session_id).await.unwrap().unwrap();
    let mut game = versioned.value;
    let idiot = game.player("u2").unwrap();
    assert!(idiot.is_alive);
    assert!(idiot.has_tag(Tag::RevealedIdiot));
    assert_eq!(game.phase(), GamePhase::NightWolves);

    game.state.phase = GamePhase::DayVote;
    state.store.save(&game, versioned.version).await.unwrap();
    assert!(matches!(
        game_service::submit_vote(state, "u2", "01").await,
        Err(GameError::Validation(ValidationError::VotingBarred))
    ));
}

#[tokio::test]
async fn test_voted_out_hunter_shoots_before_night() {
    let harness = test_harness(ScriptedRandom::default());
    let state = &harness.state;
    let mut game = game_with_roles(&[
        Role::Werewolf,
        Role::Werewolf,
        Role::Hunter,
        Role::Villager,
        Role::Villager,
        Role::Seer,
        Role::Villager,
    ]);
    game.state.phase = GamePhase::DayVote;
    state.store.insert(&game).await.unwrap();

    for voter in ["u1", "u2", "u4", "u5", "u6", "u7"] {
        game_service::submit_vote(state, voter, "03").await.unwrap();
    }
    game_service::submit_vote(state, "u3", "00").await.unwrap();
    assert_eq!(load(&harness, &game.session_id).await.phase(), GamePhase::HunterShooting);

    assert!(matches!(
        game_service::submit_ability(state, "u3", AbilityKind::Claw, Some("01")).await,
        Err(GameError::Validation(ValidationError::WrongRole))
    ));
    game_service::submit_ability(state, "u3", AbilityKind::Shoot, Some("01"))
        .await
        .unwrap();

    let game = load(&harness, &game.session_id).await;
    assert!(!game.player("u1").unwrap().is_alive);
    assert_eq!(game.phase(), GamePhase::NightWolves);
    assert_eq!(game.state.day, 2);
}

#[tokio::test]
async fn test_force_end_requires_host_or_admin() {
    let config = GameConfig {
        admin_ids: vec!["admin".to_string()],
        ..GameConfig::default()
    };
    let harness = test_harness_with_config(config, ScriptedRandom::default());
    lobby(&harness, "g1", 3).await;

    assert!(matches!(
        game_service::force_end(&harness.state, "g1", "u2").await,
        Err(GameError::Validation(ValidationError::NotAuthorized))
    ));
    game_service::force_end(&harness.state, "g1", "admin")
        .await
        .unwrap();
    assert!(harness.state.store.load("g1").await.unwrap().is_none());
    assert!(harness
        .notifier
        .broadcasts()
        .iter()
        .any(|b| b.contains("管理者による終了")));
}

#[tokio::test]
async fn test_idle_sessions_are_swept() {
    let harness = test_harness(ScriptedRandom::default());
    lobby(&harness, "g1", 3).await;

    harness.clock.advance(Duration::from_secs(60 * 60));
    assert_eq!(deadline_sweeper::sweep_idle(&harness.state).await.unwrap(), 0);

    harness.clock.advance(Duration::from_secs(60 * 60 + 1));
    assert_eq!(deadline_sweeper::sweep_idle(&harness.state).await.unwrap(), 1);
    assert!(harness.state.store.session_ids().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_idle_session_revived_before_end_is_kept() {
    let harness = test_harness(ScriptedRandom::default());
    lobby(&harness, "g1", 2).await;
    harness.clock.advance(Duration::from_secs(3 * 60 * 60));

    // 古い状態では放置と判定されるが、終了前に参加者が来る
    let stale = load(&harness, "g1").await;
    assert!(harness.clock.now() - stale.state.last_activity > chrono::Duration::hours(2));
    game_service::join_game(&harness.state, "g1", "u3", "P3")
        .await
        .unwrap();

    let ended = game_service::end_if_idle(&harness.state, "g1", chrono::Duration::hours(2))
        .await
        .unwrap();
    assert!(!ended);
    assert_eq!(load(&harness, "g1").await.players.len(), 3);
    assert!(harness.notifier.broadcasts().iter().all(|b| !b.contains("長時間操作がなかった")));
}

#[tokio::test]
async fn test_ended_session_closes_player_channels() {
    let harness = test_harness(ScriptedRandom::default());
    lobby(&harness, "g1", 3).await;
    let mut rx = harness.state.channels.player_channel("u2").await.subscribe();

    game_service::force_end(&harness.state, "g1", "u1").await.unwrap();

    assert!(matches!(
        rx.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Closed)
    ));
}
