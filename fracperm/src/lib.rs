#![no_std]
#![forbid(unsafe_code)]

//! Fractional permissions and typestate checking.
//!
//! This library checks that objects are used according to
//! access permissions and abstract states declared by their methods.
//!
//! # Usage
//!
//! Every object type has a *state space*:
//! a hierarchy of states, such as `Open` and `Closed` refining `alive`.
//! A method declares in its *signature* which permissions it requires
//! from its caller (the precondition) and which it returns (the postcondition).
//! A permission grants a certain kind of access (such as `unique` or `pure`)
//! to an object, possibly knowing the object to be in certain states.
//!
//! The state of the analysis at a program point is a [`Context`]:
//! a collection of [`TupleMap`]s, each mapping object locations to
//! the permissions held for them.
//! How is a method call processed?
//! The precondition is split off the permissions of the caller,
//! which fails if the permissions do not suffice.
//! Then the postcondition is merged in.
//! Every failed check yields a [`Diagnostic`].
//!
//! The following example closes a file and then tries to read from it:
//!
//! ~~~
//! # use fracperm::{Args, Context, Loc};
//! # use fracperm::call::Call;
//! # use fracperm::sig::{parse_signature, SignatureOptions, Spaces};
//! # use fracperm::state::StateSpaceBuilder;
//! let mut b = StateSpaceBuilder::new("File");
//! b.state("Open", "alive")?;
//! b.state("Closed", "alive")?;
//! let file = b.build();
//!
//! let spaces: Spaces = [("this".to_string(), &file), ("#0".to_string(), &file)].into();
//! let opts = SignatureOptions::default();
//! let sig = |pre: &str, post: &str| parse_signature(pre, post, &spaces, &opts);
//!
//! // method body receiving an open file as first argument
//! let (entry, _) = sig("unique(#0) in Open", "")?;
//! let (close_pre, close_post) = sig("full(this) in Open", "full(this) in Closed")?;
//! let (read_pre, read_post) = sig("pure(this) in Open", "pure(this)")?;
//!
//! let file_loc = Loc(0);
//! let params: Args = [("#0".to_string(), file_loc)].into();
//! let ctx = Context::initial(&entry, &params);
//!
//! let args: Args = [("this".to_string(), file_loc)].into();
//! let close = Call { pre: &close_pre, post: &close_post, args: &args, receiver: Some(file_loc) };
//! let read = Call { pre: &read_pre, post: &read_post, args: &args, receiver: Some(file_loc) };
//!
//! let (ctx, diags) = ctx.handle_call(&close);
//! assert!(diags.is_empty());
//!
//! // the file is closed now, so reading fails
//! let (_, diags) = ctx.handle_call(&read);
//! assert_eq!(diags.len(), 1);
//! # Ok::<_, fracperm::Error>(())
//! ~~~
//!
//! # Organisation
//!
//! * [`state`] declares state spaces,
//! * [`fraction`] handles symbolic fractions and constraints over them,
//! * [`perm`] and [`perms`] implement permissions and
//!   the permissions held for a single location,
//! * [`sig`] and [`invariant`] turn annotations into predicates,
//! * [`tuple`] and [`context`] implement the abstract values at program points, and
//! * [`call`] checks method calls.

extern crate alloc;
#[macro_use]
extern crate log;

pub mod cache;
pub mod call;
pub mod context;
pub mod diag;
pub mod error;
pub mod facts;
pub mod fraction;
pub mod invariant;
mod kind;
pub mod loc;
pub mod perm;
pub mod perms;
pub mod sig;
pub mod state;
pub mod tuple;
pub mod visit;

pub use cache::ParseCache;
pub use context::Context;
pub use diag::{Diagnostic, Phase};
pub use error::Error;
pub use kind::PermissionKind;
pub use loc::{Args, Loc};
pub use perm::{FractionalPermission, Permission};
pub use perms::FractionalPermissions;
pub use state::{StateId, StateSpace};
pub use tuple::TupleMap;
