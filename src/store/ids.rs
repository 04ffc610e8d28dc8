//! 起動フラグや`add_volumes`で指定されるボリュームID集合の構文.
use std::collections::btree_set;
use std::collections::BTreeSet;
use std::str::FromStr;
use trackable::error::ErrorKindExt;

use crate::{Error, ErrorKind, Result};

/// ボリュームID集合の文字列表現.
///
/// 構文はコンマ区切りの項目列で、各項目は単一のID `N`か、
/// 両端を含む範囲 `A-B`（`A <= B`、いずれもu32）のどちらか.
/// 重複するIDは一つに畳まれる.
///
/// # Examples
///
/// ```
/// use needls::store::VolumeIdSet;
///
/// let set: VolumeIdSet = "0,1-3,4".parse().unwrap();
/// assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
///
/// let set: VolumeIdSet = "0-99".parse().unwrap();
/// assert_eq!(set.len(), 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeIdSet(BTreeSet<u32>);
impl VolumeIdSet {
    /// 含まれるIDの数を返す.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// 集合が空かどうかを返す.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 含まれるIDを昇順に走査するイテレータを返す.
    pub fn iter(&self) -> VolumeIds {
        VolumeIds(self.0.iter())
    }
}
impl FromStr for VolumeIdSet {
    type Err = Error;

    /// ボリュームID集合の文字列表現を解釈する.
    ///
    /// # Errors
    ///
    /// 項目が空・十進数として不正・`A > B`の範囲、のいずれかの場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    fn from_str(s: &str) -> Result<Self> {
        let mut ids = BTreeSet::new();
        for item in s.split(',') {
            match item.find('-') {
                None => {
                    let id = track!(parse_id(item))?;
                    ids.insert(id);
                }
                Some(i) => {
                    let start = track!(parse_id(&item[..i]))?;
                    let end = track!(parse_id(&item[i + 1..]))?;
                    track_assert!(
                        start <= end,
                        ErrorKind::InvalidInput,
                        "Descending volume id range: {:?}",
                        item
                    );
                    ids.extend(start..=end);
                }
            }
        }
        Ok(VolumeIdSet(ids))
    }
}

/// [`VolumeIdSet`]の要素を昇順に走査するイテレータ.
///
/// [`VolumeIdSet`]: struct.VolumeIdSet.html
#[derive(Debug)]
pub struct VolumeIds<'a>(btree_set::Iter<'a, u32>);
impl<'a> Iterator for VolumeIds<'a> {
    type Item = u32;
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().cloned()
    }
}

fn parse_id(s: &str) -> Result<u32> {
    track!(
        s.parse::<u32>()
            .map_err(|e| Error::from(ErrorKind::InvalidInput.cause(e))),
        "Invalid volume id: {:?}",
        s
    )
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn parse_works() -> TestResult {
        let set: VolumeIdSet = track!("0,1-3,4".parse())?;
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);

        let set: VolumeIdSet = track!("0-99".parse())?;
        assert_eq!(set.len(), 100);

        let set: VolumeIdSet = track!("7".parse())?;
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![7]);

        // 重複は一つに畳まれる
        let set: VolumeIdSet = track!("1,1-2,2".parse())?;
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2]);
        Ok(())
    }

    #[test]
    fn parse_rejects_garbage() {
        for s in &["", "1,", "a", "1-2-3", "3-1", "-1", "1--2", "4294967296"] {
            let e = s.parse::<VolumeIdSet>().err().map(|e| *e.kind());
            assert_eq!(e, Some(ErrorKind::InvalidInput), "input: {:?}", s);
        }
    }
}
