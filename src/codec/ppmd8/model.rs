//! Context tree maintenance for variant I, including the cut-off restore.

use tracing::debug;

use super::{Ppmd8, MAX_ORDER};
use crate::codec::sub_alloc::STATE_SIZE;
use crate::codec::{
    hi_bits_flag3, hi_bits_flag4, RestoreMethod, See, SeeRef, BIN_SCALE, INIT_BIN_ESC, MAX_FREQ,
    PERIOD_BITS,
};

/// Context has been rescaled at least once.
const FLAG_RESCALED: u8 = 1 << 2;

/// Previous symbol had its high bits set.
const FLAG_PREV_HIGH: u8 = 1 << 4;

/// Binary contexts up to this order survive a cut-off even without
/// successors.
const O_BOUND: u32 = 9;

impl Ppmd8 {
    pub(super) fn restart_model(&mut self) {
        self.sa.reset();

        self.order_fall = self.max_order;
        self.init_rl = -(self.max_order.min(12) as i32) - 1;
        self.run_length = self.init_rl;
        self.prev_success = 0;

        let root = self.sa.alloc_initial_context();
        let stats = self.sa.alloc_initial(256 / 2);
        self.min_context = root;
        self.max_context = root;
        self.found_state = stats;
        self.set_num_stats(root, 255);
        self.set_flags(root, 0);
        self.sa.set_summ_freq(root, 256 + 1);
        self.sa.set_stats(root, stats);
        self.sa.set_suffix(root, 0);
        for sym in 0..=255u8 {
            let s = stats + u32::from(sym) * STATE_SIZE;
            self.sa.write_state(s, sym, 1, 0);
        }

        let mut i = 0;
        for (m, row) in self.bin_summ.iter_mut().enumerate() {
            while usize::from(self.ns2index[i]) == m {
                i += 1;
            }
            for (k, &esc) in INIT_BIN_ESC.iter().enumerate() {
                let val = (BIN_SCALE - u32::from(esc) / (i as u32 + 1)) as u16;
                for r in (0..64).step_by(8) {
                    row[k + r] = val;
                }
            }
        }

        let mut i = 0;
        for (m, row) in self.see.iter_mut().enumerate() {
            while usize::from(self.ns2index[i + 3]) == m + 3 {
                i += 1;
            }
            let summ = ((2 * i as u32 + 5) << (PERIOD_BITS - 4)) as u16;
            row.fill(See::new(summ, 7));
        }
        self.dummy_see = See::dummy();
    }

    /// Rescales `ctx` by `scale` after its stats array shrank from
    /// `old_nu` units, and recomputes its high-bit flag.
    fn refresh(&mut self, ctx: u32, old_nu: u32, scale: u32) {
        let ns = self.num_stats(ctx);
        let stats = self.sa.shrink_units(self.sa.stats(ctx), old_nu, (ns + 2) >> 1);
        self.sa.set_stats(ctx, stats);

        let summ = self.sa.summ_freq(ctx);
        let scale = scale | u32::from(summ >= 1 << 15);
        let mut high = u32::from(self.sa.state_symbol(stats)) + 0xC0;
        let freq = self.sa.state_freq(stats);
        let mut esc_freq = summ.wrapping_sub(freq);
        let mut sum_freq = (freq + scale) >> scale;
        self.sa.set_state_freq(stats, sum_freq);

        for k in 1..=ns {
            let s = stats + k * STATE_SIZE;
            let freq = self.sa.state_freq(s);
            esc_freq = esc_freq.wrapping_sub(freq);
            let freq = (freq + scale) >> scale;
            sum_freq += freq;
            self.sa.set_state_freq(s, freq);
            high |= u32::from(self.sa.state_symbol(s)) + 0xC0;
        }

        self.sa
            .set_summ_freq(ctx, sum_freq + (esc_freq.wrapping_add(scale) >> scale));
        let kept = self.flags(ctx) & (FLAG_PREV_HIGH + FLAG_RESCALED * scale as u8);
        self.set_flags(ctx, kept + ((high >> 5) & 8) as u8);
    }

    /// Turns a context that lost all but one symbol into a binary context
    /// holding `stats[0]`.
    fn collapse_to_binary(&mut self, ctx: u32, stats: u32) {
        let sym = self.sa.state_symbol(stats);
        let freq = (self.sa.state_freq(stats) + 11) >> 3;
        let successor = self.sa.state_successor(stats);
        let flags = (self.flags(ctx) & FLAG_PREV_HIGH) + hi_bits_flag3(sym);
        self.set_flags(ctx, flags);
        self.sa.write_state(ctx + 2, sym, freq, successor);
    }

    /// Prunes the subtree under `ctx`: drops states whose successors point
    /// into the text area and contexts left without a reason to exist.
    /// Returns `ctx`, or 0 if it was freed.
    fn cut_off(&mut self, ctx: u32, order: u32) -> u32 {
        let ns = self.num_stats(ctx);

        if ns == 0 {
            let s = ctx + 2;
            let successor = self.sa.state_successor(s);
            if successor >= self.sa.units_start {
                let successor = if order < self.max_order {
                    self.cut_off(successor, order + 1)
                } else {
                    0
                };
                self.sa.set_state_successor(s, successor);
                if successor != 0 || order <= O_BOUND {
                    return ctx;
                }
            }
            self.sa.special_free_unit(ctx);
            return 0;
        }

        let nu = (ns + 2) >> 1;
        let stats = self.sa.move_units_up(self.sa.stats(ctx), nu);
        self.sa.set_stats(ctx, stats);

        let mut last = ns as i32;
        for k in (0..=ns).rev() {
            let s = stats + k * STATE_SIZE;
            let successor = self.sa.state_successor(s);
            if successor < self.sa.units_start {
                let s2 = stats + last as u32 * STATE_SIZE;
                last -= 1;
                if order != 0 {
                    if s != s2 {
                        self.sa.copy_state(s, s2);
                    }
                } else {
                    self.sa.swap_states(s, s2);
                    self.sa.set_state_successor(s2, 0);
                }
            } else if order < self.max_order {
                let successor = self.cut_off(successor, order + 1);
                self.sa.set_state_successor(s, successor);
            } else {
                self.sa.set_state_successor(s, 0);
            }
        }

        if last != ns as i32 && order != 0 {
            if last < 0 {
                self.sa.free_units(stats, nu);
                self.sa.special_free_unit(ctx);
                return 0;
            }
            let last = last as u32;
            self.set_num_stats(ctx, last);
            if last == 0 {
                self.collapse_to_binary(ctx, stats);
                self.sa.free_units(stats, nu);
            } else {
                let summ = self.sa.summ_freq(ctx);
                self.refresh(ctx, nu, u32::from(summ > 16 * last));
            }
        }
        ctx
    }

    /// Recovers from an exhausted arena. Contexts from `max_context` down to
    /// `ctx_error` lose the symbol just added to them; the rest get a higher
    /// escape estimate. Then the model restarts or is cut off.
    fn restore_model(&mut self, ctx_error: u32) {
        self.sa.text = 0;

        let mut c = self.max_context;
        while c != ctx_error && c != 0 {
            let ns = self.num_stats(c).wrapping_sub(1) & 0xFF;
            self.set_num_stats(c, ns);
            if ns == 0 {
                let stats = self.sa.stats(c);
                self.collapse_to_binary(c, stats);
                self.sa.special_free_unit(stats);
            } else {
                self.refresh(c, (ns + 3) >> 1, 0);
            }
            c = self.sa.suffix(c);
        }

        while c != self.min_context && c != 0 {
            let ns = self.num_stats(c);
            if ns == 0 {
                let one = c + 2;
                let freq = self.sa.state_freq(one);
                self.sa.set_state_freq(one, (freq + 1) >> 1);
            } else {
                let summ = (self.sa.summ_freq(c) + 4) & 0xFFFF;
                self.sa.set_summ_freq(c, summ);
                if summ > 128 + 4 * ns {
                    self.refresh(c, (ns + 2) >> 1, 1);
                }
            }
            c = self.sa.suffix(c);
        }

        if self.restore_method == RestoreMethod::Restart
            || self.sa.used_memory() < self.sa.size() >> 1
            || !self.prune_to_three_quarters()
        {
            self.restarts += 1;
            debug!(
                restarts = self.restarts,
                arena = self.sa.size(),
                "variant I arena exhausted, restarting model"
            );
            self.restart_model();
        } else {
            self.sa.set_glue_count(0);
            self.order_fall = self.max_order;
            self.cut_offs += 1;
            debug!(
                cut_offs = self.cut_offs,
                used = self.sa.used_memory(),
                arena = self.sa.size(),
                "variant I arena exhausted, cut off model"
            );
        }
        self.min_context = self.max_context;
    }

    /// Cuts the tree off from the root until at most 3/4 of the arena is in
    /// use. Returns `false` if a pass frees nothing, which happens when the
    /// root alone exceeds that bound in a tiny arena.
    fn prune_to_three_quarters(&mut self) -> bool {
        while self.sa.suffix(self.max_context) != 0 {
            self.max_context = self.sa.suffix(self.max_context);
        }
        let limit = 3 * (self.sa.size() >> 2);
        loop {
            let before = self.sa.used_memory();
            self.cut_off(self.max_context, 0);
            self.sa.expand_text_area();
            let used = self.sa.used_memory();
            if used <= limit {
                return true;
            }
            if used >= before {
                return false;
            }
        }
    }

    /// Creates single-symbol contexts for the found symbol from `c` up to
    /// the current order. `s1` is the state of the found symbol in the
    /// first suffix, if already located. `None` when the arena is full.
    fn create_successors(&mut self, skip: bool, mut s1: Option<u32>, mut c: u32) -> Option<u32> {
        let mut up_branch = self.sa.state_successor(self.found_state);
        let found_symbol = self.sa.state_symbol(self.found_state);
        let mut ps = [0u32; MAX_ORDER as usize + 1];
        let mut num_ps = 0;

        if !skip {
            ps[num_ps] = self.found_state;
            num_ps += 1;
        }

        loop {
            let suffix = self.sa.suffix(c);
            if suffix == 0 {
                break;
            }
            c = suffix;
            let s = if let Some(s) = s1.take() {
                s
            } else if self.num_stats(c) != 0 {
                let s = self.sa.find_state(self.sa.stats(c), found_symbol);
                let freq = self.sa.state_freq(s);
                if freq < MAX_FREQ - 9 {
                    self.sa.set_state_freq(s, freq + 1);
                    let summ = self.sa.summ_freq(c);
                    self.sa.set_summ_freq(c, summ + 1);
                }
                s
            } else {
                let s = c + 2;
                let freq = self.sa.state_freq(s);
                let suffix_binary = self.num_stats(self.sa.suffix(c)) == 0;
                self.sa
                    .set_state_freq(s, freq + u32::from(suffix_binary && freq < 24));
                s
            };
            let successor = self.sa.state_successor(s);
            if successor != up_branch {
                c = successor;
                if num_ps == 0 {
                    return Some(c);
                }
                break;
            }
            ps[num_ps] = s;
            num_ps += 1;
        }

        let new_sym = self.sa.read_u8(up_branch);
        up_branch += 1;
        let flags = hi_bits_flag4(found_symbol) + hi_bits_flag3(new_sym);

        let new_freq = if self.num_stats(c) == 0 {
            self.sa.state_freq(c + 2)
        } else {
            let s = self.sa.find_state(self.sa.stats(c), new_sym);
            let cf = self.sa.state_freq(s) - 1;
            let s0 = self
                .sa
                .summ_freq(c)
                .wrapping_sub(self.num_stats(c))
                .wrapping_sub(cf);
            1 + if 2 * cf <= s0 {
                u32::from(5 * cf > s0)
            } else {
                (cf + 2 * s0 - 3) / s0
            }
        };

        for &s in ps[..num_ps].iter().rev() {
            let c1 = self.sa.alloc_context()?;
            self.set_flags(c1, flags);
            self.set_num_stats(c1, 0);
            self.sa.write_state(c1 + 2, new_sym, new_freq, up_branch);
            self.sa.set_suffix(c1, c);
            self.sa.set_state_successor(s, c1);
            c = c1;
        }
        Some(c)
    }

    /// Handles a found state without any successor: points the shorter
    /// contexts at the text and finds the first real successor below.
    fn reduce_order(&mut self, mut s1: Option<u32>, mut c: u32) -> Option<u32> {
        let c1 = c;
        let up_branch = self.sa.text;
        let found_symbol = self.sa.state_symbol(self.found_state);

        self.sa.set_state_successor(self.found_state, up_branch);
        self.order_fall += 1;

        let s = loop {
            let s = if let Some(s) = s1.take() {
                c = self.sa.suffix(c);
                s
            } else {
                let suffix = self.sa.suffix(c);
                if suffix == 0 {
                    return Some(c);
                }
                c = suffix;
                if self.num_stats(c) != 0 {
                    let s = self.sa.find_state(self.sa.stats(c), found_symbol);
                    let freq = self.sa.state_freq(s);
                    if freq < MAX_FREQ - 9 {
                        self.sa.set_state_freq(s, freq + 2);
                        let summ = self.sa.summ_freq(c);
                        self.sa.set_summ_freq(c, summ + 2);
                    }
                    s
                } else {
                    let s = c + 2;
                    let freq = self.sa.state_freq(s);
                    self.sa.set_state_freq(s, freq + u32::from(freq < 32));
                    s
                }
            };
            if self.sa.state_successor(s) != 0 {
                break s;
            }
            self.sa.set_state_successor(s, up_branch);
            self.order_fall += 1;
        };

        if self.sa.state_successor(s) <= up_branch {
            let saved = self.found_state;
            self.found_state = s;
            let successor = self.create_successors(false, None, c).unwrap_or(0);
            self.sa.set_state_successor(s, successor);
            self.found_state = saved;
        }

        let successor = self.sa.state_successor(s);
        if self.order_fall == 1 && c1 == self.max_context {
            self.sa.set_state_successor(self.found_state, successor);
            self.sa.text -= 1;
        }
        (successor != 0).then_some(successor)
    }

    pub(super) fn update_model(&mut self) {
        let f_symbol = self.sa.state_symbol(self.found_state);
        let f_freq = self.sa.state_freq(self.found_state);
        let mut min_successor = self.sa.state_successor(self.found_state);

        let mut s = None;
        let suffix = self.sa.suffix(self.min_context);
        if f_freq < MAX_FREQ / 4 && suffix != 0 {
            let c = suffix;
            if self.num_stats(c) == 0 {
                let one = c + 2;
                let freq = self.sa.state_freq(one);
                if freq < 32 {
                    self.sa.set_state_freq(one, freq + 1);
                }
                s = Some(one);
            } else {
                let stats = self.sa.stats(c);
                let mut st = self.sa.find_state(stats, f_symbol);
                if st != stats
                    && self.sa.state_freq(st) >= self.sa.state_freq(st - STATE_SIZE)
                {
                    self.sa.swap_states(st, st - STATE_SIZE);
                    st -= STATE_SIZE;
                }
                let freq = self.sa.state_freq(st);
                if freq < MAX_FREQ - 9 {
                    self.sa.set_state_freq(st, freq + 2);
                    let summ = self.sa.summ_freq(c);
                    self.sa.set_summ_freq(c, summ + 2);
                }
                s = Some(st);
            }
        }

        let mut c = self.max_context;
        if self.order_fall == 0 && min_successor != 0 {
            match self.create_successors(true, s, self.min_context) {
                Some(cs) => {
                    self.sa.set_state_successor(self.found_state, cs);
                    self.min_context = cs;
                    self.max_context = cs;
                }
                None => {
                    self.sa.set_state_successor(self.found_state, 0);
                    self.restore_model(c);
                }
            }
            return;
        }

        let text = self.sa.text;
        self.sa.write_u8(text, f_symbol);
        self.sa.text = text + 1;
        if self.sa.text >= self.sa.units_start {
            self.restore_model(c);
            return;
        }
        let mut max_successor = self.sa.text;

        if min_successor == 0 {
            match self.reduce_order(s, self.min_context) {
                Some(cs) => min_successor = cs,
                None => {
                    self.restore_model(c);
                    return;
                }
            }
        } else if min_successor < self.sa.units_start {
            match self.create_successors(false, s, self.min_context) {
                Some(cs) => min_successor = cs,
                None => {
                    self.restore_model(c);
                    return;
                }
            }
        }

        self.order_fall -= 1;
        if self.order_fall == 0 {
            max_successor = min_successor;
            if self.max_context != self.min_context {
                self.sa.text -= 1;
            }
        }

        let flag = hi_bits_flag3(f_symbol);
        let mc = self.min_context;
        let ns = self.num_stats(mc);
        let s0 = self
            .sa
            .summ_freq(mc)
            .wrapping_sub(ns)
            .wrapping_sub(f_freq);

        while c != mc {
            let ns1 = self.num_stats(c);
            let mut sum;
            if ns1 != 0 {
                if ns1 & 1 != 0 {
                    let Some(stats) = self.sa.expand_units(self.sa.stats(c), (ns1 + 1) >> 1)
                    else {
                        self.restore_model(c);
                        return;
                    };
                    self.sa.set_stats(c, stats);
                }
                sum = self.sa.summ_freq(c) + u32::from(3 * ns1 + 1 < ns);
            } else {
                let Some(s2) = self.sa.alloc_units(0) else {
                    self.restore_model(c);
                    return;
                };
                let mut freq = self.sa.state_freq(c + 2);
                self.sa.copy_state(s2, c + 2);
                self.sa.set_stats(c, s2);
                freq = if freq < MAX_FREQ / 4 - 1 {
                    freq * 2
                } else {
                    MAX_FREQ - 4
                };
                self.sa.set_state_freq(s2, freq);
                sum = freq + self.init_esc + u32::from(ns > 2);
            }

            let s2 = self.sa.stats(c) + (ns1 + 1) * STATE_SIZE;
            let mut cf = 2 * (sum + 6) * f_freq;
            let sf = s0.wrapping_add(sum);
            self.sa.write_u8(s2, f_symbol);
            self.set_num_stats(c, ns1 + 1);
            self.sa.set_state_successor(s2, max_successor);
            let flags = self.flags(c) | flag;
            self.set_flags(c, flags);
            if cf < 6 * sf {
                cf = 1 + u32::from(cf > sf) + u32::from(cf >= 4 * sf);
                sum += 4;
            } else {
                cf = 4
                    + u32::from(cf > 9 * sf)
                    + u32::from(cf > 12 * sf)
                    + u32::from(cf > 15 * sf);
                sum += cf;
            }
            self.sa.set_summ_freq(c, sum);
            self.sa.set_state_freq(s2, cf);
            c = self.sa.suffix(c);
        }
        self.min_context = min_successor;
        self.max_context = min_successor;
    }

    fn rescale(&mut self) {
        let mc = self.min_context;
        let stats = self.sa.stats(mc);

        let mut s = self.found_state;
        while s != stats {
            self.sa.swap_states(s, s - STATE_SIZE);
            s -= STATE_SIZE;
        }

        let first = self.sa.state_freq(stats);
        let mut esc_freq = self.sa.summ_freq(mc).wrapping_sub(first);
        let adder = u32::from(self.order_fall != 0);
        let mut sum_freq = (first + 4 + adder) >> 1;
        self.sa.set_state_freq(stats, sum_freq);

        let ns = self.num_stats(mc);
        for i in 1..=ns {
            let s = stats + i * STATE_SIZE;
            let mut freq = self.sa.state_freq(s);
            esc_freq = esc_freq.wrapping_sub(freq);
            freq = (freq + adder) >> 1;
            sum_freq += freq;
            self.sa.set_state_freq(s, freq);
            let mut s1 = s;
            while s1 != stats && freq > self.sa.state_freq(s1 - STATE_SIZE) {
                self.sa.swap_states(s1, s1 - STATE_SIZE);
                s1 -= STATE_SIZE;
            }
        }

        let mut s = stats + ns * STATE_SIZE;
        if self.sa.state_freq(s) == 0 {
            let mut removed = 0;
            loop {
                removed += 1;
                s -= STATE_SIZE;
                if self.sa.state_freq(s) != 0 {
                    break;
                }
            }
            esc_freq = esc_freq.wrapping_add(removed);
            let ns_new = ns - removed;
            self.set_num_stats(mc, ns_new);
            let n0 = (ns + 2) >> 1;

            if ns_new == 0 {
                let freq = ((2 * self.sa.state_freq(stats) + esc_freq - 1) / esc_freq)
                    .min(MAX_FREQ / 3);
                let sym = self.sa.state_symbol(stats);
                let flags = (self.flags(mc) & FLAG_PREV_HIGH) + hi_bits_flag3(sym);
                self.set_flags(mc, flags);
                let one = mc + 2;
                self.sa.copy_state(one, stats);
                self.sa.set_state_freq(one, freq);
                self.found_state = one;
                self.sa.free_units(stats, n0);
                return;
            }

            let n1 = (ns_new + 2) >> 1;
            if n0 != n1 {
                let shrunk = self.sa.shrink_units(stats, n0, n1);
                self.sa.set_stats(mc, shrunk);
            }

            // Dropped symbols may have been the only high ones.
            let stats = self.sa.stats(mc);
            let high = (0..=ns_new).fold(0, |acc, i| {
                acc | hi_bits_flag3(self.sa.state_symbol(stats + i * STATE_SIZE))
            });
            let flags = (self.flags(mc) & !8) | high;
            self.set_flags(mc, flags);
        }

        self.sa.set_summ_freq(
            mc,
            sum_freq
                .wrapping_add(esc_freq)
                .wrapping_sub(esc_freq >> 1),
        );
        let flags = self.flags(mc) | FLAG_RESCALED;
        self.set_flags(mc, flags);
        self.found_state = self.sa.stats(mc);
    }

    pub(super) fn make_esc_freq(&mut self, num_masked: u32) -> (SeeRef, u32) {
        let mc = self.min_context;
        let ns = self.num_stats(mc);
        if ns == 0xFF {
            return (SeeRef::Dummy, 1);
        }
        let row = usize::from(self.ns2index[ns as usize + 2]) - 3;
        let suffix_ns = self.num_stats(self.sa.suffix(mc));
        let col = usize::from(self.sa.summ_freq(mc) > 11 * (ns + 1))
            + 2 * usize::from(2 * ns < suffix_ns + num_masked)
            + usize::from(self.flags(mc));
        let esc = self.see[row][col].take_mean();
        (SeeRef::Cell(row, col), esc)
    }

    pub(super) fn see_mut(&mut self, see: SeeRef) -> &mut See {
        match see {
            SeeRef::Dummy => &mut self.dummy_see,
            SeeRef::Cell(row, col) => &mut self.see[row][col],
        }
    }

    fn next_context(&mut self) {
        let c = self.sa.state_successor(self.found_state);
        if self.order_fall == 0 && c >= self.sa.units_start {
            self.min_context = c;
            self.max_context = c;
        } else {
            self.update_model();
        }
    }

    pub(super) fn update1(&mut self) {
        let mut s = self.found_state;
        let freq = self.sa.state_freq(s) + 4;
        let mc = self.min_context;
        let summ = self.sa.summ_freq(mc);
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq);
        if freq > self.sa.state_freq(s - STATE_SIZE) {
            self.sa.swap_states(s, s - STATE_SIZE);
            s -= STATE_SIZE;
            self.found_state = s;
            if freq > MAX_FREQ {
                self.rescale();
            }
        }
        self.next_context();
    }

    pub(super) fn update1_0(&mut self) {
        let s = self.found_state;
        let mc = self.min_context;
        let freq = self.sa.state_freq(s);
        let summ = self.sa.summ_freq(mc);
        self.prev_success = u32::from(2 * freq >= summ);
        self.run_length += self.prev_success as i32;
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq + 4);
        if freq + 4 > MAX_FREQ {
            self.rescale();
        }
        self.next_context();
    }

    pub(super) fn update2(&mut self) {
        let s = self.found_state;
        let freq = self.sa.state_freq(s) + 4;
        self.run_length = self.init_rl;
        let mc = self.min_context;
        let summ = self.sa.summ_freq(mc);
        self.sa.set_summ_freq(mc, summ + 4);
        self.sa.set_state_freq(s, freq);
        if freq > MAX_FREQ {
            self.rescale();
        }
        self.update_model();
    }

    pub(super) fn update_bin(&mut self, s: u32) {
        self.found_state = s;
        self.prev_success = 1;
        self.run_length += 1;
        let freq = self.sa.state_freq(s);
        self.sa.set_state_freq(s, freq + u32::from(freq < 196));
        self.next_context();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(order: u32, restore: RestoreMethod) -> Ppmd8 {
        Ppmd8::new(order, 1 << 16, restore).unwrap()
    }

    #[test]
    fn test_restart_tables() {
        let m = model(6, RestoreMethod::Restart);
        assert_eq!(m.bin_summ[0][0], (BIN_SCALE - 0x3CDD / 2) as u16);
        // Bucket 6 covers frequencies 7 and 8.
        assert_eq!(m.bin_summ[6][1], (BIN_SCALE - 0x1F3F / 9) as u16);
        assert_eq!(m.see[0][0].summ, 7 << 3);
        assert_eq!(m.see[0][31].count, 7);
        assert_eq!(m.dummy_see.shift, PERIOD_BITS as u8);
    }

    #[test]
    fn test_refresh_halves_and_flags() {
        let mut m = model(6, RestoreMethod::Restart);
        let root = m.min_context;
        let stats = m.sa.stats(root);
        for i in 0..256 {
            m.sa.set_state_freq(stats + i * STATE_SIZE, 4);
        }
        m.sa.set_summ_freq(root, 256 * 4 + 10);
        m.set_flags(root, FLAG_RESCALED);
        m.refresh(root, 128, 1);
        assert_eq!(m.sa.stats(root), stats);
        assert_eq!(m.sa.state_freq(stats), 2);
        assert_eq!(m.sa.summ_freq(root), 256 * 2 + 5);
        // Symbols above 0x3F are present and the rescale bit is kept.
        assert_eq!(m.flags(root), FLAG_RESCALED | 8);

        // An unscaled refresh drops the rescale bit.
        m.refresh(root, 128, 0);
        assert_eq!(m.flags(root), 8);
        assert_eq!(m.sa.state_freq(stats), 2);
    }

    #[test]
    fn test_rescale_collapses_to_binary() {
        let mut m = model(6, RestoreMethod::Restart);
        // Build a two-symbol max-order context by hand: 'a' dominant,
        // 'b' about to vanish.
        let ctx = m.sa.alloc_context().unwrap();
        let stats = m.sa.alloc_units(0).unwrap();
        m.set_num_stats(ctx, 1);
        m.set_flags(ctx, FLAG_PREV_HIGH);
        m.sa.set_summ_freq(ctx, 130);
        m.sa.set_stats(ctx, stats);
        m.sa.set_suffix(ctx, m.min_context);
        m.sa.write_state(stats, b'a', 125, 0);
        m.sa.write_state(stats + STATE_SIZE, b'b', 1, 0);
        m.min_context = ctx;
        m.found_state = stats;
        m.order_fall = 0;
        m.rescale();

        assert_eq!(m.num_stats(ctx), 0);
        assert_eq!(m.found_state, ctx + 2);
        assert_eq!(m.sa.state_symbol(ctx + 2), b'a');
        // esc = 130 - 125 - 1 + 1 = 5, freq = (2 * 64 + 4) / 5.
        assert_eq!(m.sa.state_freq(ctx + 2), 26);
        assert_eq!(m.flags(ctx), FLAG_PREV_HIGH | 8);
    }

    /// Builds `parent -> child` binary contexts where the child only points
    /// into the text area.
    fn binary_chain(m: &mut Ppmd8) -> (u32, u32) {
        let root = m.min_context;
        let parent = m.sa.alloc_context().unwrap();
        let child = m.sa.alloc_context().unwrap();
        m.set_num_stats(parent, 0);
        m.set_flags(parent, 0);
        m.sa.write_state(parent + 2, b'z', 3, child);
        m.sa.set_suffix(parent, root);
        m.set_num_stats(child, 0);
        m.set_flags(child, 0);
        m.sa.write_state(child + 2, b'y', 1, 5);
        m.sa.set_suffix(child, parent);
        (parent, child)
    }

    #[test]
    fn test_cut_off_binary_contexts() {
        let mut m = model(16, RestoreMethod::CutOff);
        assert!(m.sa.units_start > 5);

        // Low orders survive without successors.
        let (parent, _) = binary_chain(&mut m);
        assert_eq!(m.cut_off(parent, 5), parent);
        assert_eq!(m.sa.state_successor(parent + 2), 0);

        // Deep ones are released.
        let (parent, _) = binary_chain(&mut m);
        assert_eq!(m.cut_off(parent, 12), 0);
        assert!(m.arena_usage().is_consistent());
    }

    #[test]
    fn test_cut_off_drops_text_successors() {
        let mut m = model(16, RestoreMethod::CutOff);
        let root = m.min_context;
        let ctx = m.sa.alloc_context().unwrap();
        let stats = m.sa.alloc_units(0).unwrap();
        m.set_num_stats(ctx, 1);
        m.set_flags(ctx, FLAG_PREV_HIGH);
        m.sa.set_summ_freq(ctx, 40);
        m.sa.set_stats(ctx, stats);
        m.sa.set_suffix(ctx, root);
        m.sa.write_state(stats, b'p', 9, 7);
        m.sa.write_state(stats + STATE_SIZE, b'q', 16, 0);
        // Both successors are text pointers, so nothing survives.
        assert_eq!(m.cut_off(ctx, 3), 0);
    }
}
