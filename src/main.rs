use async_std::task;
use log::*;
use std::sync::Arc;
use std::time::Duration;

use pollsync::{
    InMemoryPollService, OptionId, PollAddress, PollDraft, PollId, SyncConfig, SyncState,
    VoteCommandProcessor, Voter,
};

/**
 * Print the poll the way a chat client would draw it
 */
fn render(processor: &VoteCommandProcessor, poll_id: PollId) {
    let view = match processor.view(poll_id) {
        Some(view) => view,
        None => return,
    };
    let state = processor
        .status(poll_id)
        .map(|status| status.state())
        .unwrap_or(SyncState::Idle);

    println!("{} [{:?}, revision {}]", view.question, state, view.revision);
    for option in view.options.iter() {
        let badges: Vec<&str> = option.voters.iter().map(|v| v.initials.as_str()).collect();
        println!(
            "  {} {:<12} {:>3}% ({}) {}",
            if option.selected { "*" } else { " " },
            option.text,
            option.percentage,
            option.vote_count,
            badges.join(" ")
        );
    }
}

#[async_std::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();

    let config = SyncConfig::from_env()?;
    let me = Voter::new("u-me", "Robin Example");
    let service = Arc::new(
        InMemoryPollService::new(me.clone()).with_latency(Duration::from_millis(250)),
    );

    let address = PollAddress::new("general", "msg-1");
    service.seed(
        &address,
        &PollDraft {
            question: "Where should we have lunch?".to_string(),
            options: vec!["Noodle bar".to_string(), "Tacos".to_string(), "Salads".to_string()],
            allow_multiple_answers: false,
        },
    );
    for (id, name) in [("u-ada", "Ada Lovelace"), ("u-alan", "alan")] {
        service.cast_as(&address, &Voter::new(id, name), &[OptionId::from("opt2")])?;
    }

    let processor = VoteCommandProcessor::new(service.clone(), me, config);
    let poll_id = processor.open(address.clone()).await?;
    render(&processor, poll_id);

    let voting = {
        let processor = processor.clone();
        task::spawn(async move { processor.submit_vote(poll_id, &[OptionId::from("opt1")]).await })
    };
    task::sleep(Duration::from_millis(50)).await;
    println!("-- before the service answered");
    render(&processor, poll_id);

    match voting.await {
        Ok(_) => info!("Vote confirmed"),
        Err(err) => error!("Vote failed: {}", err),
    }
    println!("-- after the service answered");
    render(&processor, poll_id);

    service.close_poll(&address);
    if let Err(err) = processor.submit_vote(poll_id, &[OptionId::from("opt3")]).await {
        println!("-- the poll was closed: {}", err);
    }
    render(&processor, poll_id);

    processor.close(poll_id);
    Ok(())
}
