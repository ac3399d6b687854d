//! Wire protocol framing: the fixed header (see [`header`]) and the `OP_MSG`/`OP_COMPRESSED`
//! body codec (see [`message`]).

pub(crate) mod header;
pub(crate) mod message;
