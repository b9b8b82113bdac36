// Privacy — admission filtering for invites, direct messages and calls

pub mod gate;

pub use gate::{
    admit_call, admit_direct_message, admit_invite, Admission, ContactView, DmPolicy,
    PrivacyPolicy, Rejection,
};
