use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use veil_bot::handlers::{START_TEXT, UNAUTHORIZED_TEXT};
use veil_bot::telegram::{BotApi, Chat, File, Message, Update, User};
use veil_bot::{BotError, BotResult, Dispatcher, Handler, Processed, Processor};
use veil_packer::Stage;

const OWNER: i64 = 42;
const STRANGER: i64 = 7;

enum Poll {
    Fail,
    Deliver(Vec<Update>),
    Shutdown,
}

struct ScriptedApi {
    script: Mutex<VecDeque<Poll>>,
    polls: Mutex<Vec<(Option<i64>, Instant)>>,
    sent: Mutex<Vec<(i64, String)>>,
    shutdown: watch::Sender<bool>,
}

fn chat_message(chat_id: i64, from: Option<i64>, text: &str) -> Message {
    Message {
        message_id: 1,
        from: from.map(|id| User {
            id,
            is_bot: false,
            first_name: "Ada".to_string(),
            username: None,
        }),
        chat: Chat {
            id: chat_id,
            kind: "private".to_string(),
        },
        text: Some(text.to_string()),
        document: None,
    }
}

fn text_update(update_id: i64, user_id: i64, text: &str) -> Update {
    Update {
        update_id,
        message: Some(chat_message(user_id, Some(user_id), text)),
    }
}

#[async_trait]
impl BotApi for ScriptedApi {
    async fn get_updates(&self, offset: Option<i64>, _timeout: Duration) -> BotResult<Vec<Update>> {
        self.polls.lock().unwrap().push((offset, Instant::now()));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Poll::Fail) => Err(BotError::Api {
                code: Some(502),
                description: "Bad Gateway".to_string(),
            }),
            Some(Poll::Deliver(updates)) => Ok(updates),
            Some(Poll::Shutdown) | None => {
                let _ = self.shutdown.send(true);
                std::future::pending().await
            }
        }
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> BotResult<Message> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(chat_message(chat_id, None, text))
    }

    async fn get_file(&self, _file_id: &str) -> BotResult<File> {
        unreachable!("no documents in this script")
    }

    async fn download_file(&self, _file_path: &str, _dest: &Path) -> BotResult<PathBuf> {
        unreachable!("no documents in this script")
    }

    async fn send_document(&self, _chat_id: i64, _path: &Path, _caption: &str) -> BotResult<Message> {
        unreachable!("no documents in this script")
    }
}

struct IdleProcessor;

#[async_trait]
impl Processor for IdleProcessor {
    async fn process(&self, _input: PathBuf, _progress: mpsc::UnboundedSender<Stage>) -> BotResult<Processed> {
        unreachable!("no documents in this script")
    }
}

#[tokio::test(start_paused = true)]
async fn polls_in_order_with_backoff_until_shutdown() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let api = Arc::new(ScriptedApi {
        script: Mutex::new(VecDeque::from([
            Poll::Fail,
            Poll::Fail,
            Poll::Deliver(vec![
                text_update(10, OWNER, "/start"),
                text_update(11, STRANGER, "/start"),
            ]),
            Poll::Fail,
            Poll::Shutdown,
        ])),
        polls: Mutex::new(Vec::new()),
        sent: Mutex::new(Vec::new()),
        shutdown: shutdown_tx,
    });

    let dir = tempfile::tempdir().unwrap();
    let handler = Handler::new(api.clone(), Arc::new(IdleProcessor), OWNER, dir.path().join("incoming"));
    let dispatcher = Dispatcher::new(api.clone(), handler, Duration::from_secs(30));

    tokio::time::timeout(Duration::from_secs(600), dispatcher.run(shutdown_rx))
        .await
        .expect("dispatcher stops once shutdown is signalled");

    let polls = api.polls.lock().unwrap().clone();
    let offsets: Vec<Option<i64>> = polls.iter().map(|(offset, _)| *offset).collect();
    assert_eq!(offsets, vec![None, None, None, Some(12), Some(12)]);

    // Two failures back off 1s then 2s; the successful batch resets it to 1s.
    let gaps: Vec<u64> = polls
        .windows(2)
        .map(|w| (w[1].1 - w[0].1).as_secs())
        .collect();
    assert_eq!(gaps, vec![1, 2, 0, 1]);

    assert_eq!(
        api.sent.lock().unwrap().clone(),
        vec![
            (OWNER, START_TEXT.to_string()),
            (STRANGER, UNAUTHORIZED_TEXT.to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn already_signalled_shutdown_skips_polling() {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    shutdown_tx.send(true).unwrap();
    let api = Arc::new(ScriptedApi {
        script: Mutex::new(VecDeque::new()),
        polls: Mutex::new(Vec::new()),
        sent: Mutex::new(Vec::new()),
        shutdown: shutdown_tx,
    });

    let dir = tempfile::tempdir().unwrap();
    let handler = Handler::new(api.clone(), Arc::new(IdleProcessor), OWNER, dir.path().join("incoming"));
    Dispatcher::new(api.clone(), handler, Duration::from_secs(30))
        .run(shutdown_rx)
        .await;

    assert!(api.polls.lock().unwrap().is_empty());
}
