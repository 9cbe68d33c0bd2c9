//! The player thread's outer loop.
//!
//! Between playback runs the thread sits here, dispatching commands that
//! arrive while nothing is playing. Play/Queue hand control to
//! [`do_play`](crate::player::play::do_play), which returns when the run
//! ends; whatever command ended it is still in the mailbox and gets its
//! ack from this loop.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::decoder::DecoderControl;
use crate::events::EventPipe;
use crate::output::OutputBank;
use crate::player::control::{Command, PlayerControl};
use crate::player::play::do_play;

pub(crate) fn spawn(
    pc: Arc<PlayerControl>,
    dc: Arc<DecoderControl>,
    outputs: Box<dyn OutputBank>,
    events: Arc<EventPipe>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("player".to_string())
        .spawn(move || player_task(pc, dc, outputs, events))
}

fn player_task(
    pc: Arc<PlayerControl>,
    dc: Arc<DecoderControl>,
    mut outputs: Box<dyn OutputBank>,
    events: Arc<EventPipe>,
) {
    loop {
        match pc.command() {
            Command::Play | Command::Queue => {
                debug_assert!(pc.has_next_song());
                do_play(&pc, &dc, outputs.as_mut(), &events);
            }

            Command::Stop | Command::Seek | Command::Pause => {
                // Only meaningful while playing; seen here they are
                // leftovers of a run that already ended.
                pc.clear_next_song();
                pc.command_finished();
            }

            Command::CloseAudio => {
                outputs.close();
                pc.command_finished();
            }

            Command::Cancel => {
                pc.clear_next_song();
                pc.command_finished();
            }

            Command::Exit => {
                dc.quit();
                outputs.close();
                pc.command_finished();
                tracing::debug!(target: "player", "player task exiting");
                return;
            }

            Command::None => pc.notify.wait(),
        }
    }
}
