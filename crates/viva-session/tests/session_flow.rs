//! End-to-end behaviour of the session controller against in-process fakes,
//! on tokio's paused clock.

mod common;

use common::{controller, identify, Options, SESSION_ID};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use viva_session::{
    ChannelEvent, ControlSignal, InboundMessage, InterviewSessionController, OutboundFrame,
    SessionCommand, SessionError, SessionEvent, SessionOutcome, SessionResult, TurnState,
};
use viva_voice::PlaybackEvent;

type RunHandle = tokio::task::JoinHandle<(InterviewSessionController, SessionResult<SessionOutcome>)>;

fn spawn_run(
    mut controller: InterviewSessionController,
) -> (RunHandle, mpsc::UnboundedSender<SessionCommand>) {
    let (commands_tx, mut commands_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let outcome = controller.run(&mut commands_rx).await;
        (controller, outcome)
    });
    (handle, commands_tx)
}

async fn wait_for_state(
    status: &mut tokio::sync::watch::Receiver<viva_session::SessionStatus>,
    state: TurnState,
) {
    timeout(Duration::from_secs(120), status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("never reached {:?}", state))
        .expect("controller gone");
}

fn is_audio(frame: &OutboundFrame) -> bool {
    matches!(frame, OutboundFrame::Audio(_))
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_sends_end_interview_after_budget() {
    let (mut ctrl, mut peer) = controller(Options {
        budget_secs: 5,
        ..Default::default()
    });
    ctrl.start().unwrap();
    assert_eq!(ctrl.state(), TurnState::Listening);
    let listening_at = Instant::now();

    let mut status = ctrl.subscribe();
    let (handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    let elapsed = listening_at.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "ended early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5100), "ended late: {:?}", elapsed);
    wait_for_state(&mut status, TurnState::Ending).await;
    assert_eq!(status.borrow().remaining_secs, 0);

    peer.send(ChannelEvent::Inbound(InboundMessage::Control(
        ControlSignal::InterviewEnded,
    )));
    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Completed);
    assert_eq!(ctrl.state(), TurnState::Ended);
    assert!(!peer.mic_live.load(Ordering::SeqCst));
    assert!(peer.drain_wire().is_empty(), "end-interview must be sent once");
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_while_recording_ends_without_a_turn() {
    let (mut ctrl, mut peer) = controller(Options {
        budget_secs: 3,
        ..Default::default()
    });
    ctrl.start().unwrap();
    ctrl.dispatch(SessionEvent::Channel(ChannelEvent::Opened));
    assert_eq!(peer.next_frame().await, identify());

    peer.speak();
    ctrl.dispatch(SessionEvent::VolumeTick);
    assert_eq!(ctrl.state(), TurnState::Recording);

    // the candidate never stops talking
    for _ in 0..3 {
        assert_eq!(ctrl.state(), TurnState::Recording);
        peer.speak();
        ctrl.dispatch(SessionEvent::VolumeTick);
        ctrl.dispatch(SessionEvent::SliceTick);
        ctrl.dispatch(SessionEvent::CountdownTick);
    }

    assert_eq!(ctrl.state(), TurnState::Ending);
    assert!(!ctrl.is_capturing());
    assert_eq!(ctrl.turns(), 0);
    let frames = peer.drain_wire();
    let (last, chunks) = frames.split_last().expect("frames sent");
    assert_eq!(last, &OutboundFrame::EndInterview);
    assert_eq!(chunks.len(), 3);
    assert!(chunks.iter().all(is_audio));
}

async fn skip_to_end_of_turn(peer: &mut common::Peer) {
    loop {
        let frame = peer.next_frame().await;
        if frame == OutboundFrame::EndOfTurn {
            return;
        }
        assert!(is_audio(&frame), "unexpected {:?}", frame);
    }
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_while_awaiting_reply_ends_interview() {
    let (mut ctrl, mut peer) = controller(Options {
        budget_secs: 4,
        ..Default::default()
    });
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    peer.hush();
    wait_for_state(&mut status, TurnState::AwaitingReply).await;
    assert!(status.borrow().remaining_secs > 0);
    skip_to_end_of_turn(&mut peer).await;

    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    wait_for_state(&mut status, TurnState::Ending).await;
    assert_eq!(status.borrow().remaining_secs, 0);
    assert!(peer.drain_wire().is_empty());

    peer.send(ChannelEvent::Inbound(InboundMessage::Control(
        ControlSignal::InterviewEnded,
    )));
    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Completed);
    assert_eq!(ctrl.turns(), 1);
    assert!(!ctrl.is_capturing());
    assert_eq!(peer.sink_stops.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn countdown_expiry_while_playing_stops_the_reply() {
    let (mut ctrl, mut peer) = controller(Options {
        budget_secs: 4,
        ..Default::default()
    });
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    peer.hush();
    wait_for_state(&mut status, TurnState::AwaitingReply).await;
    skip_to_end_of_turn(&mut peer).await;

    peer.send(ChannelEvent::Inbound(InboundMessage::Reply(b"reply".to_vec())));
    let (_reply_id, bytes) = peer.next_play().await;
    assert_eq!(bytes, b"reply".to_vec());
    wait_for_state(&mut status, TurnState::Playing).await;
    assert_eq!(peer.sink_stops.load(Ordering::SeqCst), 0);

    // the reply is never reported finished; only the budget ends it
    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    wait_for_state(&mut status, TurnState::Ending).await;
    assert_eq!(peer.sink_stops.load(Ordering::SeqCst), 1);
    assert!(peer.drain_wire().is_empty());

    peer.send(ChannelEvent::Closed { reason: None });
    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Completed);
    assert!(!ctrl.is_playing());
    assert!(!ctrl.is_capturing());
    assert_eq!(peer.sink_stops.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn chunks_recorded_while_connecting_follow_identify_in_order() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (_handle, _commands) = spawn_run(ctrl);

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    // stay half a period away from the slice ticks
    sleep(Duration::from_millis(500)).await;
    for _ in 0..3 {
        peer.tap.push(&vec![0.5; 1600]);
        sleep(Duration::from_millis(1000)).await;
    }
    assert_eq!(status.borrow().state, TurnState::Recording);
    assert!(peer.drain_wire().is_empty(), "nothing may be sent before open");

    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());
    let mut seqs = Vec::new();
    for _ in 0..3 {
        match peer.next_frame().await {
            OutboundFrame::Audio(chunk) => {
                if seqs.is_empty() {
                    assert_eq!(&chunk.bytes[0..4], b"RIFF");
                }
                seqs.push(chunk.seq);
            }
            other => panic!("expected audio, got {:?}", other),
        }
    }
    assert_eq!(seqs, vec![0, 1, 2]);
}

#[tokio::test(start_paused = true)]
async fn full_turn_round_trip() {
    let (mut ctrl, mut peer) = controller(Options {
        greeting: b"greeting".to_vec(),
        ..Default::default()
    });
    ctrl.start().unwrap();
    assert_eq!(ctrl.state(), TurnState::Playing);
    let mut status = ctrl.subscribe();
    let (handle, commands) = spawn_run(ctrl);

    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    let (greeting_id, bytes) = peer.next_play().await;
    assert_eq!(bytes, b"greeting".to_vec());
    // the countdown only starts once the greeting is over
    sleep(Duration::from_secs(3)).await;
    assert_eq!(status.borrow().remaining_secs, 600);
    assert!(!status.borrow().countdown_running);
    peer.playback_events
        .send(PlaybackEvent::Finished(greeting_id))
        .unwrap();
    wait_for_state(&mut status, TurnState::Listening).await;

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    peer.tap.push(&vec![0.4; 3200]);
    sleep(Duration::from_millis(1100)).await;
    peer.hush();

    let mut frames = Vec::new();
    loop {
        let frame = peer.next_frame().await;
        if frame == OutboundFrame::EndOfTurn {
            break;
        }
        assert!(is_audio(&frame), "unexpected {:?}", frame);
        frames.push(frame);
    }
    assert!(!frames.is_empty());
    let seqs: Vec<u64> = frames
        .iter()
        .map(|f| match f {
            OutboundFrame::Audio(c) => c.seq,
            _ => unreachable!(),
        })
        .collect();
    assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));
    wait_for_state(&mut status, TurnState::AwaitingReply).await;
    assert_eq!(status.borrow().turns, 1);

    peer.send(ChannelEvent::Inbound(InboundMessage::Reply(b"reply".to_vec())));
    let (reply_id, bytes) = peer.next_play().await;
    assert_eq!(bytes, b"reply".to_vec());
    wait_for_state(&mut status, TurnState::Playing).await;
    peer.playback_events
        .send(PlaybackEvent::Finished(reply_id))
        .unwrap();
    wait_for_state(&mut status, TurnState::Listening).await;

    commands.send(SessionCommand::End).unwrap();
    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    wait_for_state(&mut status, TurnState::Ending).await;
    peer.send(ChannelEvent::Closed { reason: None });

    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Completed);
    assert_eq!(ctrl.turns(), 1);
}

#[tokio::test(start_paused = true)]
async fn remote_completion_preempts_playback_without_end_request() {
    let (mut ctrl, mut peer) = controller(Options {
        greeting: b"hello".to_vec(),
        ..Default::default()
    });
    ctrl.start().unwrap();
    let (handle, _commands) = spawn_run(ctrl);
    let (greeting_id, _) = peer.next_play().await;

    peer.send(ChannelEvent::Opened);
    peer.send(ChannelEvent::Inbound(InboundMessage::Control(
        ControlSignal::InterviewEnded,
    )));
    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::Completed);
    assert!(!ctrl.is_playing());
    assert_eq!(peer.sink_stops.load(Ordering::SeqCst), 1);
    assert_eq!(peer.drain_wire(), vec![identify()]);

    // a late completion for the interrupted greeting changes nothing
    let mut ctrl = ctrl;
    ctrl.dispatch(SessionEvent::Playback(PlaybackEvent::Finished(greeting_id)));
    assert_eq!(ctrl.state(), TurnState::Ended);
}

#[tokio::test(start_paused = true)]
async fn reply_during_recording_is_dropped() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (_handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    peer.send(ChannelEvent::Inbound(InboundMessage::Reply(b"early".to_vec())));
    sleep(Duration::from_millis(200)).await;

    assert!(peer.plays.try_recv().is_err());
    assert_eq!(status.borrow().state, TurnState::Recording);
}

#[tokio::test(start_paused = true)]
async fn reply_while_listening_is_played() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (_handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);

    peer.send(ChannelEvent::Inbound(InboundMessage::Reply(b"nudge".to_vec())));
    let (_, bytes) = peer.next_play().await;
    assert_eq!(bytes, b"nudge".to_vec());
    wait_for_state(&mut status, TurnState::Playing).await;
}

#[tokio::test(start_paused = true)]
async fn playback_failure_rearms_listening() {
    let (mut ctrl, _peer) = controller(Options {
        greeting: b"hello".to_vec(),
        sink_fails: true,
        ..Default::default()
    });
    ctrl.start().unwrap();
    assert_eq!(ctrl.state(), TurnState::Listening);
    assert!(ctrl.status().countdown_running);
}

#[tokio::test(start_paused = true)]
async fn reported_playback_failure_rearms_listening() {
    let (mut ctrl, mut peer) = controller(Options {
        greeting: b"corrupt".to_vec(),
        ..Default::default()
    });
    ctrl.start().unwrap();
    let (id, _) = peer.next_play().await;
    ctrl.dispatch(SessionEvent::Playback(PlaybackEvent::Failed(
        id,
        "decode failed".to_string(),
    )));
    assert_eq!(ctrl.state(), TurnState::Listening);
}

#[tokio::test(start_paused = true)]
async fn channel_loss_halts_the_session() {
    let (mut ctrl, peer) = controller(Options::default());
    ctrl.start().unwrap();
    let (handle, _commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    peer.send(ChannelEvent::Failed("connection reset".to_string()));

    let (ctrl, outcome) = handle.await.unwrap();
    assert_eq!(
        outcome.unwrap(),
        SessionOutcome::ChannelLost("connection reset".to_string())
    );
    assert_eq!(ctrl.state(), TurnState::Ended);
    assert!(!peer.mic_live.load(Ordering::SeqCst));
    assert!(ctrl.channel_state().is_none());
}

#[tokio::test(start_paused = true)]
async fn unconfirmed_end_times_out() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    let (handle, commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    commands.send(SessionCommand::End).unwrap();
    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    let requested_at = Instant::now();

    let (_ctrl, outcome) = handle.await.unwrap();
    assert_eq!(outcome.unwrap(), SessionOutcome::TimedOut);
    assert!(requested_at.elapsed() >= Duration::from_secs(30));
}

#[tokio::test(start_paused = true)]
async fn ending_during_recording_discards_the_turn() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    let mut status = ctrl.subscribe();
    let (_handle, commands) = spawn_run(ctrl);
    peer.send(ChannelEvent::Opened);
    assert_eq!(peer.next_frame().await, identify());

    peer.speak();
    wait_for_state(&mut status, TurnState::Recording).await;
    commands.send(SessionCommand::End).unwrap();
    assert_eq!(peer.next_frame().await, OutboundFrame::EndInterview);
    wait_for_state(&mut status, TurnState::Ending).await;
    assert_eq!(status.borrow().turns, 0);
}

#[tokio::test]
async fn abandoned_session_is_deleted_exactly_once() {
    let (ctrl, mut peer) = controller(Options::default());
    drop(ctrl);

    let deleted = timeout(Duration::from_secs(5), peer.deletes.recv())
        .await
        .expect("delete never issued");
    assert_eq!(deleted.as_deref(), Some(SESSION_ID));
    sleep(Duration::from_millis(50)).await;
    assert!(peer.deletes.try_recv().is_err());
    assert_eq!(peer.delete_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn explicit_abandon_deletes_once() {
    let (ctrl, peer) = controller(Options::default());
    assert_eq!(ctrl.abandon().await.unwrap(), SessionOutcome::Abandoned);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(peer.delete_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn started_session_is_not_deleted_on_drop() {
    let (mut ctrl, mut peer) = controller(Options::default());
    ctrl.start().unwrap();
    drop(ctrl);
    assert!(timeout(Duration::from_millis(100), peer.deletes.recv())
        .await
        .map(|d| d.is_none())
        .unwrap_or(true));
    assert_eq!(peer.delete_count.load(Ordering::SeqCst), 0);
    assert!(!peer.mic_live.load(Ordering::SeqCst));
}

#[tokio::test]
async fn microphone_failure_leaves_session_not_started() {
    let (mut ctrl, _peer) = controller(Options {
        mic_fails: true,
        ..Default::default()
    });
    assert!(matches!(ctrl.start(), Err(SessionError::Microphone(_))));
    assert_eq!(ctrl.state(), TurnState::NotStarted);
    assert!(ctrl.channel_state().is_none());

    let (_tx, mut rx) = mpsc::unbounded_channel();
    assert!(matches!(
        ctrl.run(&mut rx).await,
        Err(SessionError::InvalidState(_))
    ));
}

/// Small deterministic generator so event orderings vary without extra crates.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }
}

#[tokio::test]
async fn capture_and_playback_never_overlap() {
    for seed in 1..=20u64 {
        let (mut ctrl, mut peer) = controller(Options {
            greeting: b"hi".to_vec(),
            ..Default::default()
        });
        ctrl.start().unwrap();
        let mut rng = Lcg(seed);
        let mut end_requests = 0;

        for _ in 0..300 {
            let event = match rng.next() % 9 {
                0 => {
                    peer.speak();
                    SessionEvent::VolumeTick
                }
                1 => {
                    peer.hush();
                    SessionEvent::VolumeTick
                }
                2 => SessionEvent::SliceTick,
                3 => SessionEvent::Channel(ChannelEvent::Opened),
                4 => SessionEvent::Channel(ChannelEvent::Inbound(InboundMessage::Reply(
                    b"reply".to_vec(),
                ))),
                5 | 6 => match peer.plays.try_recv() {
                    Ok((id, _)) => SessionEvent::Playback(PlaybackEvent::Finished(id)),
                    Err(_) => SessionEvent::VolumeTick,
                },
                7 => SessionEvent::CountdownTick,
                _ => {
                    if rng.next() % 20 == 0 {
                        end_requests += 1;
                        SessionEvent::Command(SessionCommand::End)
                    } else {
                        SessionEvent::SliceTick
                    }
                }
            };
            ctrl.dispatch(event);
            assert!(
                !(ctrl.is_capturing() && ctrl.is_playing()),
                "seed {} overlapped in {:?}",
                seed,
                ctrl.state()
            );
            if ctrl.state().is_terminal() {
                break;
            }
        }

        let end_frames = peer
            .drain_wire()
            .into_iter()
            .filter(|f| *f == OutboundFrame::EndInterview)
            .count();
        assert!(end_frames <= 1);
        if end_requests > 0 {
            assert_eq!(ctrl.state(), TurnState::Ending);
        }
    }
}
