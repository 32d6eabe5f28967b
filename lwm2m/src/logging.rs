use core::fmt::Write;

use tinyvec::ArrayVec;
use toad_writable::Writable;

use crate::platform::Message;
use crate::todo::code_to_human;

pub(crate) fn msg_summary(msg: &Message) -> Writable<ArrayVec<[u8; 64]>> {
  let mut buf: Writable<ArrayVec<[u8; 64]>> = Default::default();
  write!(buf,
         "{:?}: {:?} {} with {} byte payload",
         msg.code.kind(),
         msg.ty,
         code_to_human(msg.code).as_str(),
         msg.payload.0.len()).ok();
  buf
}

#[cfg(test)]
mod test {
  use toad_msg::{Code, Id, Token, Type};

  use super::*;

  #[test]
  fn summary_includes_code_and_type() {
    let msg = Message { id: Id(1),
                         ty: Type::Con,
                         ver: Default::default(),
                         code: Code::new(0, 1),
                         token: Token(Default::default()),
                         opts: Default::default(),
                         payload: toad_msg::Payload(b"hi".to_vec()) };
    let s = msg_summary(&msg);
    assert!(s.as_str().contains("Con"));
  }
}
