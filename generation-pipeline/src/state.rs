use state_machines::state_machine;

state_machine! {
    name: CorrectiveMachine,
    state: CorrectiveState,
    initial: Assessing,
    states: [Assessing, Expanding, Accepted, Exhausted],
    events {
        accept { transition: { from: Assessing, to: Accepted } }
        expand { transition: { from: Assessing, to: Expanding } }
        reassess { transition: { from: Expanding, to: Assessing } }
        exhaust { transition: { from: Assessing, to: Exhausted } }
    }
}

pub fn assessing() -> CorrectiveMachine<(), Assessing> {
    CorrectiveMachine::new(())
}
